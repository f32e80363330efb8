//! Scripted PostgreSQL backend on a loopback socket.
//!
//! Each accepted connection is handed to the script together with its
//! zero-based index, so a test can make the first connection misbehave and
//! the next one answer.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use pgquery::Opts;

pub const TEXT: u32 = 25;
pub const INT4: u32 = 23;
pub const INT8: u32 = 20;
pub const BOOL: u32 = 16;

/// One frontend message.
pub struct Message {
    pub type_byte: u8,
    pub payload: Vec<u8>,
}

/// Parse, Bind, Describe, Execute and Sync as sent by the client.
#[derive(Debug, Default)]
pub struct Cycle {
    pub sql: String,
    pub param_oids: Vec<u32>,
    pub params: Vec<Option<Vec<u8>>>,
}

pub struct Backend {
    stream: TcpStream,
}

fn cstr(payload: &[u8], pos: &mut usize) -> String {
    let end = payload[*pos..].iter().position(|b| *b == 0).unwrap() + *pos;
    let s = String::from_utf8(payload[*pos..end].to_vec()).unwrap();
    *pos = end + 1;
    s
}

fn u16_at(payload: &[u8], pos: &mut usize) -> u16 {
    let v = u16::from_be_bytes([payload[*pos], payload[*pos + 1]]);
    *pos += 2;
    v
}

fn i32_at(payload: &[u8], pos: &mut usize) -> i32 {
    let v = i32::from_be_bytes(payload[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    v
}

impl Backend {
    /// Startup packet parameters.
    pub fn read_startup(&mut self) -> Vec<(String, String)> {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len).unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize - 4];
        self.stream.read_exact(&mut body).unwrap();
        assert_eq!(&body[..4], &196608u32.to_be_bytes());

        let mut params = Vec::new();
        let mut pos = 4;
        while body[pos] != 0 {
            let key = cstr(&body, &mut pos);
            let value = cstr(&body, &mut pos);
            params.push((key, value));
        }
        params
    }

    pub fn read_message(&mut self) -> Option<Message> {
        let mut head = [0u8; 5];
        self.stream.read_exact(&mut head).ok()?;
        let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).ok()?;
        Some(Message {
            type_byte: head[0],
            payload,
        })
    }

    pub fn send(&mut self, type_byte: u8, payload: &[u8]) {
        let mut msg = vec![type_byte];
        msg.extend_from_slice(&(payload.len() as u32 + 4).to_be_bytes());
        msg.extend_from_slice(payload);
        // The client may already be gone
        let _ = self.stream.write_all(&msg);
    }

    pub fn ready(&mut self) {
        self.send(b'Z', b"I");
    }

    /// Finish startup after authentication succeeded.
    pub fn auth_ok(&mut self) {
        self.send(b'R', &0u32.to_be_bytes());
        self.send(b'S', b"server_version\x0016.0\x00");
        let mut key = 4242u32.to_be_bytes().to_vec();
        key.extend_from_slice(&7u32.to_be_bytes());
        self.send(b'K', &key);
        self.ready();
    }

    /// Startup with trust authentication.
    pub fn trust_startup(&mut self) -> Vec<(String, String)> {
        let params = self.read_startup();
        self.auth_ok();
        params
    }

    /// Read one extended-protocol cycle up to Sync. `None` if the client
    /// hung up.
    pub fn read_cycle(&mut self) -> Option<Cycle> {
        let mut cycle = Cycle::default();
        loop {
            let msg = self.read_message()?;
            let p = &msg.payload;
            match msg.type_byte {
                b'P' => {
                    let mut pos = 0;
                    let _name = cstr(p, &mut pos);
                    cycle.sql = cstr(p, &mut pos);
                    let n = u16_at(p, &mut pos);
                    for _ in 0..n {
                        cycle.param_oids.push(i32_at(p, &mut pos) as u32);
                    }
                }
                b'B' => {
                    let mut pos = 0;
                    let _portal = cstr(p, &mut pos);
                    let _stmt = cstr(p, &mut pos);
                    let formats = u16_at(p, &mut pos);
                    pos += 2 * formats as usize;
                    let n = u16_at(p, &mut pos);
                    for _ in 0..n {
                        let len = i32_at(p, &mut pos);
                        if len < 0 {
                            cycle.params.push(None);
                        } else {
                            let end = pos + len as usize;
                            cycle.params.push(Some(p[pos..end].to_vec()));
                            pos = end;
                        }
                    }
                }
                b'S' => return Some(cycle),
                b'X' => return None,
                _ => {}
            }
        }
    }

    pub fn notice(&mut self, message: &str) {
        let mut payload = Vec::new();
        for (tag, value) in [(b'S', "NOTICE"), (b'V', "NOTICE"), (b'C', "00000"), (b'M', message)] {
            payload.push(tag);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        self.send(b'N', &payload);
    }

    /// Answer a cycle with a row set.
    pub fn rows(&mut self, columns: &[(&str, u32)], rows: &[Vec<Option<Vec<u8>>>]) {
        self.send(b'1', &[]);
        self.send(b'2', &[]);

        let mut desc = (columns.len() as u16).to_be_bytes().to_vec();
        for (name, oid) in columns {
            desc.extend_from_slice(name.as_bytes());
            desc.push(0);
            desc.extend_from_slice(&0u32.to_be_bytes());
            desc.extend_from_slice(&0u16.to_be_bytes());
            desc.extend_from_slice(&oid.to_be_bytes());
            desc.extend_from_slice(&(-1i16).to_be_bytes());
            desc.extend_from_slice(&(-1i32).to_be_bytes());
            desc.extend_from_slice(&1u16.to_be_bytes());
        }
        self.send(b'T', &desc);

        for row in rows {
            let mut data = (row.len() as u16).to_be_bytes().to_vec();
            for value in row {
                match value {
                    Some(v) => {
                        data.extend_from_slice(&(v.len() as i32).to_be_bytes());
                        data.extend_from_slice(v);
                    }
                    None => data.extend_from_slice(&(-1i32).to_be_bytes()),
                }
            }
            self.send(b'D', &data);
        }

        let tag = format!("SELECT {}\0", rows.len());
        self.send(b'C', tag.as_bytes());
        self.ready();
    }

    /// Answer a cycle of a statement without rows.
    pub fn command(&mut self, tag: &str) {
        self.send(b'1', &[]);
        self.send(b'2', &[]);
        self.send(b'n', &[]);
        self.send(b'C', format!("{}\0", tag).as_bytes());
        self.ready();
    }

    /// Answer a cycle with an ErrorResponse. `code` may be omitted.
    pub fn error(&mut self, severity: &str, code: Option<&str>, message: &str) {
        self.send(b'1', &[]);
        self.send(b'E', &error_fields(severity, code, message));
        self.ready();
    }

    /// Terminate the backend the way the server does: FATAL, then close
    /// without ReadyForQuery.
    pub fn fatal(mut self, code: &str, message: &str) {
        self.send(b'E', &error_fields("FATAL", Some(code), message));
        self.hang_up();
    }

    /// Drop the socket without a word.
    pub fn hang_up(self) {
        drop(self.stream);
    }
}

fn error_fields(severity: &str, code: Option<&str>, message: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut field = |tag: u8, value: &str| {
        payload.push(tag);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
    };
    field(b'S', severity);
    field(b'V', severity);
    if let Some(code) = code {
        field(b'C', code);
    }
    field(b'M', message);
    payload.push(0);
    payload
}

pub struct MockServer {
    pub port: u16,
    accepted: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Serve `connections` connections, one after another, with `script`.
    pub fn start<F>(connections: u32, script: F) -> Self
    where
        F: Fn(u32, Backend) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicU32::new(0));
        let counter = accepted.clone();

        let handle = thread::spawn(move || {
            for index in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                script(index, Backend { stream });
            }
        });

        Self {
            port,
            accepted,
            handle: Some(handle),
        }
    }

    pub fn opts(&self) -> Opts {
        Opts {
            host: "127.0.0.1".into(),
            port: self.port,
            user: "tester".into(),
            database: Some("testdb".into()),
            ..Default::default()
        }
    }

    pub fn accepted(&self) -> u32 {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Wait for the script to finish; panics from the script surface here.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

/// Port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
