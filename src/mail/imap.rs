//! IMAP (over rustls) + SMTP (via lettre) mail client.
//!
//! Every command opens a short session, runs in `spawn_blocking`, and is
//! bounded by `MailConfig::timeout`. Message ids are IMAP UIDs in INBOX.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use super::message::{
    extract_date, extract_recipients, extract_sender, extract_text, strip_html, strip_quoted_text,
    truncate_chars,
};
use super::{EmailDetail, EmailSummary, MailClient, MailCommand, MailPayload, MailQuery, MailResult};
use crate::error::MailError;

/// Longest body returned by `Get`.
const MAX_BODY_CHARS: usize = 4000;

/// Longest snippet attached to a `List` entry.
const SNIPPET_CHARS: usize = 160;

/// Mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Mailbox archived messages are moved to.
    pub archive_mailbox: String,
    pub timeout: Duration,
}

impl MailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (mail disabled).
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let archive_mailbox =
            std::env::var("EMAIL_ARCHIVE_MAILBOX").unwrap_or_else(|_| "Archive".to_string());

        let timeout_secs: u64 = std::env::var("EMAIL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            archive_mailbox,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Mail client over IMAP + SMTP.
pub struct ImapMailClient {
    config: MailConfig,
}

impl ImapMailClient {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    /// Send an email via SMTP (blocking).
    fn send_email(config: &MailConfig, to: &str, subject: &str, body: &str) -> Result<MailResult, MailError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| MailError::Unavailable {
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.smtp_port)
            .credentials(creds)
            .timeout(Some(config.timeout))
            .build();

        let email = Message::builder()
            .from(config.from_address.parse().map_err(|e| MailError::InvalidCommand {
                reason: format!("Invalid from address: {e}"),
            })?)
            .to(to.parse().map_err(|e| MailError::InvalidCommand {
                reason: format!("Invalid to address: {e}"),
            })?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| MailError::InvalidCommand {
                reason: format!("Failed to build email: {e}"),
            })?;

        let response = transport.send(&email).map_err(|e| {
            if e.is_permanent() {
                MailError::PermissionDenied {
                    reason: format!("SMTP rejected message: {e}"),
                }
            } else {
                MailError::Unavailable {
                    reason: format!("SMTP send failed: {e}"),
                }
            }
        })?;

        let message_id = response.message().next().unwrap_or_default().to_string();
        info!("Email sent to {to}");
        Ok(MailResult::ok(MailPayload::Sent { message_id }))
    }
}

/// Run one command against the mailbox (blocking).
fn run_command(config: &MailConfig, command: MailCommand) -> Result<MailResult, MailError> {
    match command {
        MailCommand::Send { to, subject, body } => {
            ImapMailClient::send_email(config, &to, &subject, &body)
        }
        MailCommand::List { query, max_results } => {
            with_session(config, |s| list(s, &query, max_results))
        }
        MailCommand::Get { message_id } => with_session(config, |s| get(s, &message_id)),
        MailCommand::Label { message_id, label: name } => {
            with_session(config, |s| label(s, &message_id, &name))
        }
        MailCommand::Archive { message_id } => {
            with_session(config, |s| archive(s, &message_id, &config.archive_mailbox))
        }
    }
}

/// Log in, select INBOX, run `f`, log out.
fn with_session<F>(config: &MailConfig, f: F) -> Result<MailResult, MailError>
where
    F: FnOnce(&mut ImapSession) -> Result<MailResult, MailError>,
{
    let mut session = ImapSession::connect(config)?;
    session.login(&config.username, config.password.expose_secret())?;
    session.select("INBOX")?;
    let result = f(&mut session);
    session.logout();
    result
}

fn list(session: &mut ImapSession, query: &MailQuery, max_results: usize) -> Result<MailResult, MailError> {
    let criteria = match query {
        MailQuery::Inbox => "ALL".to_string(),
        MailQuery::Unread => "UNSEEN".to_string(),
        MailQuery::From(sender) => format!("FROM {}", quote(sender)),
        MailQuery::Subject(subject) => format!("SUBJECT {}", quote(subject)),
    };
    let lines = session.command(&format!("UID SEARCH {criteria}"))?;
    let mut uids: Vec<u64> = lines
        .iter()
        .filter(|l| l.starts_with("* SEARCH"))
        .flat_map(|l| l.split_whitespace().skip(2))
        .filter_map(|s| s.parse().ok())
        .collect();
    // Highest UID = most recently delivered.
    uids.sort_unstable_by(|a, b| b.cmp(a));
    uids.truncate(max_results);

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let lines = session.command(&format!(
            "UID FETCH {uid} (BODY.PEEK[HEADER.FIELDS (FROM SUBJECT DATE)] BODY.PEEK[TEXT]<0.200>)"
        ))?;
        let mut literals = fetch_literals(&lines).into_iter();
        let headers = literals.next().unwrap_or_default();
        let Some(parsed) = MessageParser::default().parse(headers.as_bytes()) else {
            warn!(uid, "Could not parse message headers");
            continue;
        };
        messages.push(EmailSummary {
            id: uid.to_string(),
            from: extract_sender(&parsed),
            subject: parsed.subject().unwrap_or("(no subject)").to_string(),
            date: extract_date(&parsed),
            snippet: literals.next().map(|text| snippet_text(&text)).unwrap_or_default(),
        });
    }

    debug!(count = messages.len(), "IMAP list");
    Ok(MailResult::ok(MailPayload::Messages { messages }))
}

fn get(session: &mut ImapSession, message_id: &str) -> Result<MailResult, MailError> {
    let uid = parse_uid(message_id)?;
    let lines = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
    let raw = fetch_literals(&lines).into_iter().next().unwrap_or_default();
    if raw.trim().is_empty() {
        return Err(MailError::NotFound {
            message_id: message_id.to_string(),
        });
    }
    let parsed = MessageParser::default()
        .parse(raw.as_bytes())
        .ok_or_else(|| MailError::NotFound {
            message_id: message_id.to_string(),
        })?;

    let body = truncate_chars(&strip_quoted_text(&extract_text(&parsed)), MAX_BODY_CHARS);
    Ok(MailResult::ok(MailPayload::Message {
        message: EmailDetail {
            id: message_id.to_string(),
            from: extract_sender(&parsed),
            to: extract_recipients(&parsed),
            subject: parsed.subject().unwrap_or("(no subject)").to_string(),
            date: extract_date(&parsed),
            body,
            labels: Vec::new(),
        },
    }))
}

fn label(session: &mut ImapSession, message_id: &str, label: &str) -> Result<MailResult, MailError> {
    let uid = parse_uid(message_id)?;
    let mailbox = quote(label);
    let mut lines = session.command(&format!("UID COPY {uid} {mailbox}"))?;
    if tagged_no(&lines) && lines.iter().any(|l| l.contains("TRYCREATE")) {
        session.command(&format!("CREATE {mailbox}"))?;
        lines = session.command(&format!("UID COPY {uid} {mailbox}"))?;
    }
    if tagged_ok(&lines) {
        Ok(MailResult::ok(MailPayload::Labeled {
            message_id: message_id.to_string(),
            label: label.to_string(),
        }))
    } else {
        Ok(MailResult::failed(status_text(&lines)))
    }
}

fn archive(session: &mut ImapSession, message_id: &str, archive_mailbox: &str) -> Result<MailResult, MailError> {
    let uid = parse_uid(message_id)?;
    let lines = session.command(&format!("UID MOVE {uid} {}", quote(archive_mailbox)))?;
    if tagged_ok(&lines) {
        Ok(MailResult::ok(MailPayload::Archived {
            message_id: message_id.to_string(),
        }))
    } else {
        Ok(MailResult::failed(status_text(&lines)))
    }
}

fn parse_uid(message_id: &str) -> Result<u64, MailError> {
    message_id
        .trim()
        .parse()
        .map_err(|_| MailError::InvalidCommand {
            reason: format!("'{message_id}' is not a mailbox message id"),
        })
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Lines between the untagged FETCH line and the closing paren/tag lines.
/// Every `{n}` literal in a FETCH response, in order.
///
/// Lines are read up to CRLF, so a literal can end mid-line; the response is
/// rejoined and each literal is cut by its declared byte count.
fn fetch_literals(lines: &[String]) -> Vec<String> {
    let Some(start) = lines.iter().position(|l| l.starts_with('*') && l.contains("FETCH")) else {
        return Vec::new();
    };
    let raw = lines[start..].concat();
    let mut literals = Vec::new();
    let mut rest = raw.as_str();
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find("}\r\n") else {
            break;
        };
        let Ok(len) = after[..close].parse::<usize>() else {
            rest = after;
            continue;
        };
        let body = &after[close + 3..];
        let mut end = len.min(body.len());
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        literals.push(body[..end].to_string());
        rest = &body[end..];
    }
    literals
}

/// Plain-text preview from the first bytes of a message body.
///
/// MIME boundaries and part headers are skipped; the partial fetch usually
/// lands inside the first part.
fn snippet_text(raw: &str) -> String {
    let body: Vec<&str> = raw
        .lines()
        .filter(|l| {
            let t = l.trim();
            !t.starts_with("--") && !t.to_ascii_lowercase().starts_with("content-")
        })
        .collect();
    let text = strip_quoted_text(&body.join("\n"));
    let text = if text.contains('<') { strip_html(&text) } else { text };
    truncate_chars(
        &text.split_whitespace().collect::<Vec<_>>().join(" "),
        SNIPPET_CHARS,
    )
}

fn tagged_line(lines: &[String]) -> Option<&String> {
    lines.last()
}

fn tagged_ok(lines: &[String]) -> bool {
    tagged_line(lines).is_some_and(|l| l.split_whitespace().nth(1) == Some("OK"))
}

fn tagged_no(lines: &[String]) -> bool {
    tagged_line(lines).is_some_and(|l| l.split_whitespace().nth(1) == Some("NO"))
}

fn status_text(lines: &[String]) -> String {
    tagged_line(lines)
        .map(|l| l.split_whitespace().skip(2).collect::<Vec<_>>().join(" "))
        .unwrap_or_else(|| "no response from mail server".into())
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Minimal tagged-command IMAP session.
struct ImapSession {
    tls: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    fn connect(config: &MailConfig) -> Result<Self, MailError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port)).map_err(io_unavailable)?;
        tcp.set_read_timeout(Some(config.timeout)).map_err(io_unavailable)?;
        tcp.set_write_timeout(Some(config.timeout)).map_err(io_unavailable)?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| MailError::Unavailable {
                reason: format!("invalid IMAP host: {e}"),
            })?;
        let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(|e| {
            MailError::Unavailable {
                reason: format!("TLS setup failed: {e}"),
            }
        })?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };
        let _greeting = session.read_line()?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => {
                    return Err(MailError::Unavailable {
                        reason: "IMAP connection closed".into(),
                    });
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(io_unavailable(e)),
            }
        }
    }

    /// Send a command; returns every response line up to and including the tagged one.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, MailError> {
        let tag = format!("M{}", self.next_tag);
        self.next_tag += 1;
        IoWrite::write_all(&mut self.tls, format!("{tag} {cmd}\r\n").as_bytes()).map_err(io_unavailable)?;
        IoWrite::flush(&mut self.tls).map_err(io_unavailable)?;

        let tag_prefix = format!("{tag} ");
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag_prefix);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    fn login(&mut self, username: &str, password: &str) -> Result<(), MailError> {
        let lines = self.command(&format!("LOGIN {} {}", quote(username), quote(password)))?;
        if tagged_ok(&lines) {
            Ok(())
        } else {
            Err(MailError::PermissionDenied {
                reason: format!("IMAP login rejected: {}", status_text(&lines)),
            })
        }
    }

    fn select(&mut self, mailbox: &str) -> Result<(), MailError> {
        let lines = self.command(&format!("SELECT {}", quote(mailbox)))?;
        if tagged_ok(&lines) {
            Ok(())
        } else {
            Err(MailError::Unavailable {
                reason: format!("SELECT {mailbox} failed: {}", status_text(&lines)),
            })
        }
    }

    fn logout(&mut self) {
        let _ = self.command("LOGOUT");
    }
}

fn io_unavailable(e: std::io::Error) -> MailError {
    MailError::Unavailable {
        reason: format!("IMAP I/O error: {e}"),
    }
}

#[async_trait]
impl MailClient for ImapMailClient {
    fn name(&self) -> &str {
        "imap"
    }

    async fn execute(&self, command: MailCommand) -> Result<MailResult, MailError> {
        let operation = command.label();
        let config = self.config.clone();
        let timeout = self.config.timeout;

        let task = tokio::task::spawn_blocking(move || run_command(&config, command));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(MailError::Unavailable {
                reason: format!("mail task failed: {e}"),
            }),
            Err(_) => {
                warn!(operation, ?timeout, "Mail command timed out");
                Err(MailError::Unavailable {
                    reason: format!("{operation} timed out after {timeout:?}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    fn test_config() -> MailConfig {
        MailConfig {
            imap_host: "127.0.0.1".into(),
            imap_port: 1,
            smtp_host: "127.0.0.1".into(),
            smtp_port: 1,
            username: "user".into(),
            password: SecretString::from("pass"),
            from_address: "user@test.com".into(),
            archive_mailbox: "Archive".into(),
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("Important"), "\"Important\"");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn fetch_literals_cut_by_declared_length() {
        let response = lines(&[
            "* 3 FETCH (UID 42 BODY[] {38}\r\n",
            "From: alice@example.com\r\n",
            "Subject: Hi\r\n",
            ")\r\n",
            "M4 OK FETCH completed\r\n",
        ]);
        assert_eq!(
            fetch_literals(&response),
            vec!["From: alice@example.com\r\nSubject: Hi\r\n".to_string()]
        );
        assert!(fetch_literals(&lines(&["M4 OK done\r\n"])).is_empty());
    }

    #[test]
    fn list_fetch_separates_headers_from_body_preview() {
        // The text literal ends mid-line, right before the closing paren.
        let response = lines(&[
            "* 1 FETCH (UID 7 BODY[HEADER.FIELDS (FROM SUBJECT DATE)] {25}\r\n",
            "From: bob@example.com\r\n",
            "\r\n",
            " BODY[TEXT]<0> {22}\r\n",
            "Lunch at noon?\r\n",
            "Thanks)\r\n",
            "M5 OK FETCH completed\r\n",
        ]);
        let literals = fetch_literals(&response);
        assert_eq!(literals.len(), 2);
        assert_eq!(literals[0], "From: bob@example.com\r\n\r\n");
        assert!(!literals[0].contains("BODY[TEXT]"));
        assert_eq!(literals[1], "Lunch at noon?\r\nThanks");
        assert_eq!(snippet_text(&literals[1]), "Lunch at noon? Thanks");
    }

    #[test]
    fn snippet_skips_mime_scaffolding_and_quotes() {
        let raw = "--b1\r\nContent-Type: text/plain; charset=utf-8\r\n\r\nSee you there.\r\n> earlier note\r\n";
        assert_eq!(snippet_text(raw), "See you there.");
        let long = "word ".repeat(100);
        assert!(snippet_text(&long).chars().count() <= SNIPPET_CHARS + 1);
    }

    #[test]
    fn tagged_status_detection() {
        assert!(tagged_ok(&lines(&["* 1 EXISTS\r\n", "M2 OK done\r\n"])));
        assert!(tagged_no(&lines(&["M3 NO [TRYCREATE] no mailbox\r\n"])));
        assert_eq!(
            status_text(&lines(&["M3 NO [TRYCREATE] no mailbox\r\n"])),
            "[TRYCREATE] no mailbox"
        );
    }

    #[test]
    fn uid_must_be_numeric() {
        assert_eq!(parse_uid(" 42 ").unwrap(), 42);
        assert!(matches!(
            parse_uid("<abc@example.com>"),
            Err(MailError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn config_from_env_returns_none_when_no_host() {
        // SAFETY: no other test reads EMAIL_IMAP_HOST.
        unsafe { std::env::remove_var("EMAIL_IMAP_HOST") };
        assert!(MailConfig::from_env().is_none());
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let client = ImapMailClient::new(test_config());
        let result = client
            .execute(MailCommand::List {
                query: MailQuery::Unread,
                max_results: 5,
            })
            .await;
        assert!(matches!(result, Err(MailError::Unavailable { .. })));
    }
}
