//! Authentication messages.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::protocol::codec::MessageBuilder;

/// SASL mechanism implemented by [`ScramClient`].
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// GS2 header for "no channel binding".
const GS2_HEADER: &str = "n,,";

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Compute the MD5 password response: `"md5" + md5(md5(password + user) + salt)`.
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let inner = Md5::new()
        .chain_update(password.as_bytes())
        .chain_update(user.as_bytes())
        .finalize();
    let outer = Md5::new()
        .chain_update(format!("{:x}", inner).as_bytes())
        .chain_update(salt)
        .finalize();

    format!("md5{:x}", outer)
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, String> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| format!("HMAC error: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// SCRAM-SHA-256 client (RFC 7677) without channel binding.
pub struct ScramClient {
    password: String,
    nonce: String,
    /// ServerSignature we expect in server-final-message
    expected_signature: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        use rand::Rng;

        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);

        Self {
            password: password.to_string(),
            nonce: B64.encode(nonce_bytes),
            expected_signature: None,
        }
    }

    /// The user name is left empty: PostgreSQL takes it from the startup packet.
    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// Generate the client-first-message.
    pub fn client_first_message(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare())
    }

    /// Process server-first-message (`r=..,s=..,i=..`) and build client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String, String> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = v.parse::<u32>().ok(),
                _ => {}
            }
        }

        let nonce = nonce.ok_or("Missing nonce in server-first-message")?;
        let salt = salt.ok_or("Missing salt in server-first-message")?;
        let iterations = iterations.ok_or("Missing iterations in server-first-message")?;

        if !nonce.starts_with(&self.nonce) {
            return Err("Server nonce doesn't start with client nonce".to_string());
        }

        let salt = B64
            .decode(salt)
            .map_err(|e| format!("Invalid salt: {}", e))?;

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.password.as_bytes(), &salt, iterations, &mut salted);

        let client_key = hmac_sha256(&salted, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);

        let without_proof = format!("c={},r={}", B64.encode(GS2_HEADER), nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac_sha256(&salted, b"Server Key")?;
        self.expected_signature = Some(hmac_sha256(&server_key, auth_message.as_bytes())?);

        Ok(format!("{},p={}", without_proof, B64.encode(proof)))
    }

    /// Verify server-final-message (`v=<signature>`).
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), String> {
        let signature = server_final
            .strip_prefix("v=")
            .ok_or("Invalid server-final-message format")?;
        let signature = B64
            .decode(signature)
            .map_err(|e| format!("Invalid server signature: {}", e))?;

        match &self.expected_signature {
            Some(expected) if *expected == signature => Ok(()),
            Some(_) => Err("Server signature verification failed".to_string()),
            None => Err("server-final-message before server-first-message".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_password() {
        let result = md5_password("postgres", "password", &[0x01, 0x02, 0x03, 0x04]);
        assert!(result.starts_with("md5"));
        assert_eq!(result.len(), 35);
        assert_eq!(result, md5_password("postgres", "password", &[1, 2, 3, 4]));
        assert_ne!(result, md5_password("postgres", "password", &[4, 3, 2, 1]));
    }

    #[test]
    fn test_scram_rejects_foreign_nonce() {
        let mut scram = ScramClient::new("secret");
        assert!(scram.client_first_message().starts_with("n,,n=,r="));
        let err = scram
            .process_server_first("r=someoneelse,s=c2FsdA==,i=4096")
            .unwrap_err();
        assert!(err.contains("nonce"));
    }

    #[test]
    fn test_scram_round() {
        let mut scram = ScramClient::new("secret");
        let server_first = format!("r={}srv,s=c2FsdA==,i=4096", scram.nonce);
        let client_final = scram.process_server_first(&server_first).unwrap();
        assert!(client_final.starts_with("c=biws,r="));
        assert!(client_final.contains(",p="));
        assert!(scram.verify_server_final("v=AAAA").is_err());
    }
}
