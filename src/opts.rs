//! Connection and handle options.

use no_panic::no_panic;
use url::Url;

use crate::error::Error;
use crate::statement::{DEFAULT_MAX_PARAMS, DEFAULT_STATEMENT_CAPACITY};

/// Directory holding the server's Unix socket when no host is given.
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/postgresql";

/// Options for a database handle.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address. Empty means the local Unix socket.
    ///
    /// Default: `""`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path, overriding host.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication. Empty means the OS user.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// Additional startup parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,

    /// Drop server messages starting with `NOTICE:` instead of logging them.
    ///
    /// Default: `false`
    pub suppress_notices: bool,

    /// Retry connecting until it succeeds or the run token is stopped.
    ///
    /// Default: `false`
    pub keep_trying: bool,

    /// Connection attempts when `keep_trying` is off.
    ///
    /// Default: `3`
    pub max_connect_attempts: u32,

    /// Largest rewritten statement, in bytes.
    ///
    /// Default: `8192`
    pub statement_capacity: usize,

    /// Largest number of bound parameters per statement.
    ///
    /// Default: `16`
    pub max_params: usize,
}

impl Default for Opts {
    #[no_panic]
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            socket: None,
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            params: Vec::new(),
            suppress_notices: false,
            keep_trying: false,
            max_connect_attempts: 3,
            statement_capacity: DEFAULT_STATEMENT_CAPACITY,
            max_params: DEFAULT_MAX_PARAMS,
        }
    }
}

impl Opts {
    /// Options for a local database addressed by name and user only.
    pub fn from_names(dbname: Option<&str>, dbuser: Option<&str>) -> Self {
        Self {
            database: dbname.map(str::to_string),
            user: dbuser.map(str::to_string).unwrap_or_default(),
            ..Self::default()
        }
    }

    /// Whether there is anything to connect to.
    pub fn has_target(&self) -> bool {
        self.database.is_some()
            || !self.user.is_empty()
            || !self.host.is_empty()
            || self.socket.is_some()
    }

    /// Socket path used when connecting locally.
    pub fn socket_path(&self) -> Option<String> {
        match &self.socket {
            Some(path) => Some(path.clone()),
            None if self.host.is_empty() => {
                Some(format!("{}/.s.PGSQL.{}", DEFAULT_SOCKET_DIR, self.port))
            }
            None => None,
        }
    }

    /// Keyword/value rendering for logs. The password is never included.
    pub fn conninfo(&self) -> String {
        let mut parts = Vec::new();
        if let Some(db) = &self.database {
            parts.push(format!("dbname = {}", db));
        }
        if !self.user.is_empty() {
            parts.push(format!("user = {}", self.user));
        }
        if !self.host.is_empty() {
            parts.push(format!("host = {}", self.host));
            parts.push(format!("port = {}", self.port));
        }
        if let Some(socket) = &self.socket {
            parts.push(format!("socket = {}", socket));
        }
        parts.join(" ")
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "host" => self.host = value.to_string(),
            "port" => {
                self.port = value
                    .parse()
                    .map_err(|_| Error::InvalidUsage(format!("Invalid port: {}", value)))?;
            }
            "socket" => self.socket = Some(value.to_string()),
            "user" => self.user = value.to_string(),
            "dbname" => self.database = Some(value.to_string()),
            "password" => self.password = Some(value.to_string()),
            "application_name" => self.application_name = Some(value.to_string()),
            "suppress_notices" => self.suppress_notices = parse_bool(key, value)?,
            "keep_trying" => self.keep_trying = parse_bool(key, value)?,
            "max_connect_attempts" => {
                self.max_connect_attempts = parse_positive(key, value)?;
            }
            "statement_capacity" => self.statement_capacity = parse_positive(key, value)?,
            "max_params" => self.max_params = parse_positive(key, value)?,
            _ => self.params.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "True" | "1" | "yes" | "on" => Ok(true),
        "false" | "False" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", key, value))),
    }
}

fn parse_positive<T: std::str::FromStr + Default + PartialOrd>(
    key: &str,
    value: &str,
) -> Result<T, Error> {
    match value.parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", key, value))),
    }
}

/// Split a libpq-style `key = value key2='quoted value'` string.
fn parse_keyword_values(s: &str) -> Result<Vec<(String, String)>, Error> {
    let mut pairs = Vec::new();
    let mut chars = s.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(Error::InvalidUsage(format!(
                "Missing \"=\" after \"{}\" in connection info",
                key
            )));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\'') => break,
                    Some('\\') => value.extend(chars.next()),
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::InvalidUsage(
                            "Unterminated quoted string in connection info".into(),
                        ));
                    }
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
            }
        }

        pairs.push((key, value));
    }

    Ok(pairs)
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&..]`
    ///
    /// Query parameters accept the keyword/value keys (`suppress_notices`,
    /// `keep_trying`, `max_connect_attempts`, ...); unknown ones become
    /// startup parameters.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url
                .path()
                .strip_prefix('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" if value == "disable" => {}
                "sslmode" => {
                    return Err(Error::Unsupported(format!("sslmode={}", value)));
                }
                _ => opts.set(&key, &value)?,
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    /// Accepts a connection URL or a keyword/value string
    /// (`"dbname = defiance user = defiance"`).
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if s.contains("://") {
            let url =
                Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
            return Self::try_from(&url);
        }

        let mut opts = Opts::default();
        for (key, value) in parse_keyword_values(s)? {
            opts.set(&key, &value)?;
        }
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_names() {
        let opts = Opts::from_names(Some("defiance"), Some("defiance"));
        assert_eq!(opts.conninfo(), "dbname = defiance user = defiance");
        assert!(opts.has_target());
        assert_eq!(
            opts.socket_path().as_deref(),
            Some("/var/run/postgresql/.s.PGSQL.5432")
        );

        let opts = Opts::from_names(None, None);
        assert!(!opts.has_target());
        assert_eq!(opts.conninfo(), "");
    }

    #[test]
    fn test_keyword_values() {
        let opts = Opts::try_from(
            "dbname = defiance user=ops password='s3 cr\\'t' host=db.example port = 6543 keep_trying=on",
        )
        .unwrap();
        assert_eq!(opts.database.as_deref(), Some("defiance"));
        assert_eq!(opts.user, "ops");
        assert_eq!(opts.password.as_deref(), Some("s3 cr't"));
        assert_eq!(opts.host, "db.example");
        assert_eq!(opts.port, 6543);
        assert!(opts.keep_trying);
        assert_eq!(opts.socket_path(), None);
        assert!(!opts.conninfo().contains("s3"));
    }

    #[test]
    fn test_keyword_values_errors() {
        assert!(Opts::try_from("dbname").is_err());
        assert!(Opts::try_from("password='open").is_err());
        assert!(Opts::try_from("port=big").is_err());
        assert!(Opts::try_from("max_params=0").is_err());
    }

    #[test]
    fn test_url() {
        let opts = Opts::try_from(
            "postgres://ops:pw@localhost:5433/inventory?suppress_notices=true&application_name=agent&search_path=net",
        )
        .unwrap();
        assert_eq!(opts.host, "localhost");
        assert_eq!(opts.port, 5433);
        assert_eq!(opts.user, "ops");
        assert_eq!(opts.password.as_deref(), Some("pw"));
        assert_eq!(opts.database.as_deref(), Some("inventory"));
        assert!(opts.suppress_notices);
        assert_eq!(opts.application_name.as_deref(), Some("agent"));
        assert_eq!(opts.params, vec![("search_path".to_string(), "net".to_string())]);
    }

    #[test]
    fn test_url_rejects_tls() {
        assert!(Opts::try_from("postgres://localhost/db?sslmode=disable").is_ok());
        assert!(Opts::try_from("postgres://localhost/db?sslmode=require").is_err());
        assert!(Opts::try_from("mysql://localhost/db").is_err());
    }
}
