//! Raw-message normalization, dispatched by the event's source tag.
//!
//! Parsers extract structured fields from `message`; an unrecognized source
//! or an unmatched pattern yields no fields and the event passes through
//! untouched. Normalization never fails an event.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};

// Nginx combined log format:
// '$remote_addr - $remote_user [$time_local] "$request" $status $body_bytes_sent "$http_referer" "$http_user_agent"'
static NGINX_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<ip>[\d\.]+) - (?P<remote_user>[\w-]+) \[(?P<timestamp>.*?)\] "(?P<verb>\w+) (?P<path>.*?) HTTP/[0-9\.]+" (?P<status>\d+) (?P<bytes>\d+) "(?P<referrer>.*?)" "(?P<user_agent>.*?)""#,
    )
    .expect("nginx pattern")
});

// "Failed password for invalid user admin from 192.168.1.1 port 22 ssh2"
static SSH_FAILED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Failed password for (?:invalid user )?(?P<user>[\w\-_]+) from (?P<ip>[\d\.]+) port \d+ ssh2",
    )
    .expect("ssh failed pattern")
});

// "Accepted password for root from 192.168.1.1 port 22 ssh2"
static SSH_ACCEPTED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Accepted password for (?P<user>[\w\-_]+) from (?P<ip>[\d\.]+) port \d+ ssh2",
    )
    .expect("ssh accepted pattern")
});

// "[UFW BLOCK] IN=eth0 OUT= MAC=... SRC=1.2.3.4 DST=... PROTO=TCP"
static UFW_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\[UFW BLOCK\] .*?SRC=(?P<ip>[\d\.]+) .*?DST=(?P<dst>[\d\.]+) .*?PROTO=(?P<proto>\w+)",
    )
    .expect("ufw pattern")
});

#[derive(Debug, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Normalizer
    }

    /// Parse a raw message according to the source tag. Returns the extracted
    /// fields; empty when nothing matched.
    pub fn parse(&self, message: &str, source: &str) -> Map<String, Value> {
        match source {
            "nginx" => self.parse_nginx(message),
            "ssh" => self.parse_ssh(message),
            _ if message.contains("[UFW BLOCK]") => self.parse_ufw(message),
            _ => Map::new(),
        }
    }

    fn parse_nginx(&self, message: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(caps) = NGINX_PATTERN.captures(message) {
            insert_str(&mut fields, "ip", &caps["ip"]);
            insert_str(&mut fields, "remote_user", &caps["remote_user"]);
            insert_str(&mut fields, "verb", &caps["verb"]);
            insert_str(&mut fields, "path", &caps["path"]);
            insert_str(&mut fields, "referrer", &caps["referrer"]);
            insert_str(&mut fields, "user_agent", &caps["user_agent"]);
            // The ingest timestamp is authoritative; the in-message one is
            // dropped to avoid date-format conflicts downstream.
            if let Ok(status) = caps["status"].parse::<u64>() {
                fields.insert("status".to_string(), Value::Number(Number::from(status)));
            }
            if let Ok(bytes) = caps["bytes"].parse::<u64>() {
                fields.insert("bytes".to_string(), Value::Number(Number::from(bytes)));
            }
        }
        fields
    }

    fn parse_ssh(&self, message: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(caps) = SSH_FAILED_PATTERN.captures(message) {
            insert_str(&mut fields, "user", &caps["user"]);
            insert_str(&mut fields, "ip", &caps["ip"]);
            insert_str(&mut fields, "event_type", "ssh_login_failed");
            insert_str(&mut fields, "action", "block");
        } else if let Some(caps) = SSH_ACCEPTED_PATTERN.captures(message) {
            insert_str(&mut fields, "user", &caps["user"]);
            insert_str(&mut fields, "ip", &caps["ip"]);
            insert_str(&mut fields, "event_type", "ssh_login_success");
        }
        fields
    }

    fn parse_ufw(&self, message: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(caps) = UFW_PATTERN.captures(message) {
            insert_str(&mut fields, "ip", &caps["ip"]);
            insert_str(&mut fields, "dst", &caps["dst"]);
            insert_str(&mut fields, "proto", &caps["proto"]);
            insert_str(&mut fields, "event_type", "firewall_block");
            insert_str(&mut fields, "action", "blocked");
            insert_str(&mut fields, "source", "firewall");
        }
        fields
    }
}

fn insert_str(fields: &mut Map<String, Value>, key: &str, value: &str) {
    fields.insert(key.to_string(), Value::String(value.to_string()));
}
