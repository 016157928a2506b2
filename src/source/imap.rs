//! Gmail over IMAP+TLS: raw-query search with `X-GM-RAW`, body fetch by Message-ID.
//!
//! The session code is blocking and always runs on the blocking pool.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

use crate::error::SourceError;
use crate::source::{MailSource, SearchQuery, SourceItem};

static THREAD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"X-GM-THRID (\d+)").expect("thread id pattern is valid"));

static LITERAL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\d+)\}\r\n$").expect("literal pattern is valid"));

// ── Configuration ───────────────────────────────────────────────────

/// IMAP connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Mailbox searched with `X-GM-RAW`. Labels are filtered in the query.
    pub mailbox: String,
}

impl ImapConfig {
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("EMAIL_IMAP_HOST").ok()?;
        let port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);
        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let mailbox =
            std::env::var("EMAIL_MAILBOX").unwrap_or_else(|_| "[Gmail]/All Mail".to_string());

        Some(Self {
            host,
            port,
            username,
            password,
            mailbox,
        })
    }
}

// ── Source ──────────────────────────────────────────────────────────

/// Mail source backed by a Gmail IMAP account.
pub struct ImapMailSource {
    config: ImapConfig,
}

impl ImapMailSource {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SourceItem>, SourceError> {
        let config = self.config.clone();
        let raw = query.raw();
        tracing::info!(query = %raw, "Searching mailbox");
        tokio::task::spawn_blocking(move || search_blocking(&config, &raw))
            .await
            .map_err(|e| SourceError::Command {
                command: "SEARCH".into(),
                reason: format!("search task panicked: {e}"),
            })?
    }

    async fn fetch_body(&self, identifier: &str) -> Result<String, SourceError> {
        let config = self.config.clone();
        let identifier = identifier.to_string();
        tokio::task::spawn_blocking(move || fetch_body_blocking(&config, &identifier))
            .await
            .map_err(|e| SourceError::Command {
                command: "FETCH".into(),
                reason: format!("fetch task panicked: {e}"),
            })?
    }
}

fn search_blocking(config: &ImapConfig, raw: &str) -> Result<Vec<SourceItem>, SourceError> {
    let mut session = ImapSession::connect(config)?;
    session.select(&config.mailbox)?;

    let uids = session.search_raw(raw)?;
    let mut items = Vec::new();
    let mut threads = HashSet::new();

    for uid in uids {
        let lines = session.command(&format!(
            "UID FETCH {uid} (X-GM-THRID BODY.PEEK[HEADER.FIELDS (MESSAGE-ID SUBJECT DATE FROM)])"
        ))?;
        let thread_id = lines
            .first()
            .and_then(|l| THREAD_ID.captures(&String::from_utf8_lossy(l)).map(|c| c[1].to_string()));
        let Some(headers) = extract_literal(&lines) else {
            tracing::warn!(uid = %uid, "FETCH returned no header literal, skipping");
            continue;
        };
        let Some(item) = parse_headers(&headers, thread_id.as_deref()) else {
            tracing::warn!(uid = %uid, "Message has no Message-ID, skipping");
            continue;
        };

        // Only the first message of each conversation is a new application.
        if let Some(tid) = &thread_id
            && !threads.insert(tid.clone())
        {
            continue;
        }
        items.push(item);
    }

    session.logout();
    items.sort_by_key(|i| i.received_at);
    Ok(items)
}

fn fetch_body_blocking(config: &ImapConfig, identifier: &str) -> Result<String, SourceError> {
    let mut session = ImapSession::connect(config)?;
    session.select(&config.mailbox)?;

    let lines = session.command(&format!(
        "UID SEARCH HEADER Message-ID {}",
        quote(identifier)
    ))?;
    let uid = search_results(&lines)
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::NotFound(identifier.to_string()))?;

    let lines = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
    let raw = extract_literal(&lines).ok_or_else(|| SourceError::Parse(format!(
        "no message literal for {identifier}"
    )))?;
    session.logout();

    let parsed = MessageParser::default()
        .parse(&raw)
        .ok_or_else(|| SourceError::Parse(format!("unparseable message {identifier}")))?;

    if let Some(html) = parsed.body_html(0) {
        return Ok(html.into_owned());
    }
    if let Some(text) = parsed.body_text(0) {
        return Ok(text.into_owned());
    }
    Ok(String::new())
}

// ── IMAP session ────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

struct ImapSession {
    tls: TlsStream,
    host: String,
    next_tag: u32,
}

impl ImapSession {
    fn connect(config: &ImapConfig) -> Result<Self, SourceError> {
        let conn_err = |reason: String| SourceError::Connection {
            host: config.host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.host.as_str(), config.port))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| conn_err(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| conn_err(format!("TLS setup failed: {e}")))?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            host: config.host.clone(),
            next_tag: 1,
        };

        let _greeting = session.read_line()?;
        session
            .command(&format!(
                "LOGIN {} {}",
                quote(&config.username),
                quote(config.password.expose_secret())
            ))
            .map_err(|e| conn_err(format!("IMAP login failed: {e}")))?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, SourceError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.tls.read(&mut byte) {
                Ok(0) => {
                    return Err(SourceError::Connection {
                        host: self.host.clone(),
                        reason: "IMAP connection closed".into(),
                    });
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(buf);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, SourceError> {
        let mut buf = vec![0u8; n];
        self.tls.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SourceError> {
        self.tls.write_all(bytes)?;
        self.tls.flush()?;
        Ok(())
    }

    fn tag(&mut self) -> String {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    /// Send a command and collect response lines up to the tagged status.
    ///
    /// Literal payloads announced with `{n}` are read byte-exact and kept
    /// as their own entry, so message bodies never confuse tag detection.
    fn command(&mut self, cmd: &str) -> Result<Vec<Vec<u8>>, SourceError> {
        let tag = self.tag();
        self.write(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.collect_response(&tag, cmd)
    }

    /// Send a command whose last argument is a UTF-8 literal.
    fn command_with_literal(
        &mut self,
        prefix: &str,
        literal: &str,
    ) -> Result<Vec<Vec<u8>>, SourceError> {
        let tag = self.tag();
        let bytes = literal.as_bytes();
        self.write(format!("{tag} {prefix} {{{}}}\r\n", bytes.len()).as_bytes())?;

        let cont = self.read_line()?;
        if !cont.starts_with(b"+") {
            return Err(SourceError::Command {
                command: prefix.to_string(),
                reason: String::from_utf8_lossy(&cont).trim().to_string(),
            });
        }
        self.write(bytes)?;
        self.write(b"\r\n")?;
        self.collect_response(&tag, prefix)
    }

    fn collect_response(&mut self, tag: &str, cmd: &str) -> Result<Vec<Vec<u8>>, SourceError> {
        let tagged = format!("{tag} ");
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let literal_len = LITERAL_MARKER
                .captures(&String::from_utf8_lossy(&line))
                .and_then(|c| c[1].parse::<usize>().ok());
            let done = line.starts_with(tagged.as_bytes());
            lines.push(line);

            if let Some(n) = literal_len {
                lines.push(self.read_exact(n)?);
                continue;
            }
            if done {
                break;
            }
        }

        let status = lines
            .last()
            .map(|l| String::from_utf8_lossy(l).to_string())
            .unwrap_or_default();
        if !status.strip_prefix(&tagged).unwrap_or(&status).starts_with("OK") {
            let verb = cmd.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
            return Err(SourceError::Command {
                command: verb,
                reason: status.trim().to_string(),
            });
        }
        Ok(lines)
    }

    fn select(&mut self, mailbox: &str) -> Result<(), SourceError> {
        self.command(&format!("SELECT {}", quote(mailbox)))?;
        Ok(())
    }

    fn search_raw(&mut self, raw: &str) -> Result<Vec<String>, SourceError> {
        let lines = if raw.is_ascii() {
            self.command(&format!("UID SEARCH X-GM-RAW {}", quote(raw)))?
        } else {
            self.command_with_literal("UID SEARCH CHARSET UTF-8 X-GM-RAW", raw)?
        };
        Ok(search_results(&lines))
    }

    fn logout(&mut self) {
        let _ = self.command("LOGOUT");
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Quote a string as an IMAP quoted-string.
pub fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Collect ids from `* SEARCH` lines.
pub fn search_results(lines: &[Vec<u8>]) -> Vec<String> {
    lines
        .iter()
        .map(|l| String::from_utf8_lossy(l))
        .filter(|l| l.starts_with("* SEARCH"))
        .flat_map(|l| {
            l.split_whitespace()
                .skip(2)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// The first literal payload in a response, if any.
pub fn extract_literal(lines: &[Vec<u8>]) -> Option<Vec<u8>> {
    lines.iter().enumerate().find_map(|(i, line)| {
        let text = String::from_utf8_lossy(line);
        let n: usize = LITERAL_MARKER.captures(&text)?[1].parse().ok()?;
        lines.get(i + 1).filter(|l| l.len() == n).cloned()
    })
}

/// Gmail web link for a thread id reported by `X-GM-THRID`.
pub fn thread_permalink(thread_id: &str) -> Option<String> {
    let id: u64 = thread_id.parse().ok()?;
    Some(format!("https://mail.google.com/mail/u/0/#all/{id:x}"))
}

/// Build a source item from a header block.
pub fn parse_headers(raw: &[u8], thread_id: Option<&str>) -> Option<SourceItem> {
    let parsed = MessageParser::default().parse(raw)?;
    let identifier = parsed.message_id()?.trim().to_string();
    if identifier.is_empty() {
        return None;
    }
    let received_at = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);
    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string());

    Some(SourceItem {
        subject: parsed.subject().unwrap_or_default().trim().to_string(),
        received_at,
        permalink: thread_id.and_then(thread_permalink).unwrap_or_default(),
        sender,
        identifier,
    })
}

// ── Tests ───────────────────────────────────────────────────────────
