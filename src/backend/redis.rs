//! RESP backend client implementation
//!
//! Talks RESP2 over plain TCP to a Redis-compatible server. One multiplexed
//! command connection serves request/response traffic; every subscription
//! opens its own dedicated connection switched into subscribe mode, since a
//! RESP connection in subscribe mode cannot carry regular commands.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::resp::{self, Value};
use super::traits::{Backend, Subscription};
use super::types::{BackendError, ChatMessage, Delivery};

fn history_key(channel: &str) -> String {
    format!("channel:{}:history", channel)
}

/// A single RESP connection with an incremental parse buffer
pub struct RespConnection {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl RespConnection {
    /// Open a connection, failing after `connect_timeout`
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<Self, BackendError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                BackendError::Connection(format!("connect to {} timed out", addr))
            })??;

        Ok(Self {
            stream,
            buf: Vec::with_capacity(4096),
        })
    }

    /// Write one command without waiting for a reply
    pub async fn send(&mut self, args: &[&str]) -> Result<(), BackendError> {
        let encoded = resp::encode_command(args);
        self.stream.write_all(&encoded).await?;
        Ok(())
    }

    /// Read one complete frame, buffering partial reads
    ///
    /// Cancel-safe: a frame interrupted mid-read stays in the buffer and is
    /// completed by the next call.
    pub async fn read_frame(&mut self) -> Result<Value, BackendError> {
        loop {
            if let Some((value, consumed)) = resp::try_parse(&self.buf)? {
                self.buf.drain(..consumed);
                return Ok(value);
            }

            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(BackendError::Connection(
                    "connection closed by backend".to_string(),
                ));
            }
        }
    }

    /// Round-trip one command, mapping RESP error frames to errors
    pub async fn command(&mut self, args: &[&str]) -> Result<Value, BackendError> {
        self.send(args).await?;
        match self.read_frame().await? {
            Value::Error(message) => Err(BackendError::Protocol(message)),
            value => Ok(value),
        }
    }
}

/// Redis-protocol pub/sub backend
pub struct RedisBackend {
    addr: String,
    connect_timeout: Duration,
    conn: Mutex<RespConnection>,
}

impl RedisBackend {
    /// Connect the command connection; startup fails if the backend is down
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<Self, BackendError> {
        let mut conn = RespConnection::connect(addr, connect_timeout).await?;

        // PING both proves liveness and flushes greeting quirks of
        // RESP-compatible servers.
        conn.command(&["PING"]).await?;
        info!("Connected to pub/sub backend at {}", addr);

        Ok(Self {
            addr: addr.to_string(),
            connect_timeout,
            conn: Mutex::new(conn),
        })
    }

    async fn command(&self, args: &[&str]) -> Result<Value, BackendError> {
        let mut conn = self.conn.lock().await;
        conn.command(args).await
    }

    async fn open_subscription(
        &self,
        command: &str,
        target: &str,
    ) -> Result<Box<dyn Subscription>, BackendError> {
        let mut conn = RespConnection::connect(&self.addr, self.connect_timeout).await?;
        conn.send(&[command, target]).await?;

        Ok(Box::new(RedisSubscription {
            conn,
            pattern: command == "PSUBSCRIBE",
            target: target.to_string(),
            closed: false,
        }))
    }

    fn strings(value: Value) -> Vec<String> {
        match value {
            Value::Array(items) => items.into_iter().filter_map(Value::into_string).collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn publish(&self, channel: &str, message: &ChatMessage) -> Result<(), BackendError> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.lock().await;
        conn.command(&["PUBLISH", channel, &payload]).await?;
        conn.command(&["RPUSH", &history_key(channel), &payload])
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BackendError> {
        self.open_subscription("SUBSCRIBE", channel).await
    }

    async fn subscribe_pattern(
        &self,
        pattern: &str,
    ) -> Result<Box<dyn Subscription>, BackendError> {
        self.open_subscription("PSUBSCRIBE", pattern).await
    }

    async fn append_history(
        &self,
        channel: &str,
        message: &ChatMessage,
    ) -> Result<(), BackendError> {
        let payload = serde_json::to_string(message)?;
        self.command(&["RPUSH", &history_key(channel), &payload])
            .await?;
        Ok(())
    }

    async fn read_history(&self, channel: &str) -> Result<Vec<ChatMessage>, BackendError> {
        let value = self
            .command(&["LRANGE", &history_key(channel), "0", "-1"])
            .await?;

        let mut records = Vec::new();
        for entry in Self::strings(value) {
            match serde_json::from_str::<ChatMessage>(&entry) {
                Ok(message) => records.push(message),
                Err(e) => warn!("Skipping malformed history record for {}: {}", channel, e),
            }
        }
        Ok(records)
    }

    async fn active_channels(&self) -> Result<Vec<String>, BackendError> {
        let value = self.command(&["PUBSUB", "CHANNELS"]).await?;
        Ok(Self::strings(value))
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, BackendError> {
        match self.command(&["GET", key]).await? {
            Value::Nil => Ok(None),
            value => Ok(value.into_string()),
        }
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.command(&["SET", key, value]).await?;
        Ok(())
    }

    async fn kv_set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        let secs = ttl.as_secs().max(1).to_string();
        self.command(&["SETEX", key, &secs, value]).await?;
        Ok(())
    }

    async fn kv_keys(&self, pattern: &str) -> Result<Vec<String>, BackendError> {
        let value = self.command(&["KEYS", pattern]).await?;
        Ok(Self::strings(value))
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, &str)]) -> Result<(), BackendError> {
        let mut args = vec!["HSET", key];
        for (field, value) in fields.iter().copied() {
            args.push(field);
            args.push(value);
        }
        self.command(&args).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, BackendError> {
        let value = self.command(&["HGETALL", key]).await?;
        let flat = Self::strings(value);

        let mut map = HashMap::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            map.insert(field, value);
        }
        Ok(map)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), BackendError> {
        self.command(&["SADD", key, member]).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), BackendError> {
        self.command(&["SREM", key, member]).await?;
        Ok(())
    }
}

/// Dedicated subscribe-mode connection for one channel or pattern
pub struct RedisSubscription {
    conn: RespConnection,
    pattern: bool,
    target: String,
    closed: bool,
}

impl RedisSubscription {
    /// Decode a push frame; returns None for acks and frames to skip
    fn decode_push(frame: Value) -> Option<Delivery> {
        let Value::Array(items) = frame else {
            return None;
        };

        let kind = items.first().and_then(Value::as_str)?.to_string();
        let (channel, payload) = match (kind.as_str(), items.len()) {
            // ["message", channel, payload]
            ("message", 3) => (items[1].as_str()?.to_string(), &items[2]),
            // ["pmessage", pattern, channel, payload]
            ("pmessage", 4) => (items[2].as_str()?.to_string(), &items[3]),
            ("subscribe" | "psubscribe" | "unsubscribe" | "punsubscribe", _) => return None,
            _ => {
                debug!("Ignoring unexpected push frame kind: {}", kind);
                return None;
            }
        };

        let payload = payload.as_str()?;
        match serde_json::from_str::<ChatMessage>(payload) {
            Ok(message) => Some(Delivery { channel, message }),
            Err(e) => {
                warn!("Skipping malformed message on {}: {}", channel, e);
                None
            }
        }
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Delivery>, BackendError> {
        if self.closed {
            return Ok(None);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.conn.read_frame()).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(frame)) => frame,
            };

            if let Some(delivery) = Self::decode_push(frame) {
                return Ok(Some(delivery));
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let command = if self.pattern {
            "PUNSUBSCRIBE"
        } else {
            "UNSUBSCRIBE"
        };
        // The confirmation frame is not awaited; the dedicated connection is
        // dropped with the subscription.
        self.conn.send(&[command, &self.target]).await?;
        debug!("Unsubscribed from {}", self.target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_push_message() {
        let frame = Value::Array(vec![
            Value::Bulk(b"message".to_vec()),
            Value::Bulk(b"general".to_vec()),
            Value::Bulk(br#"{"username":"alice","message":"hi"}"#.to_vec()),
        ]);
        let delivery = RedisSubscription::decode_push(frame).unwrap();
        assert_eq!(delivery.channel, "general");
        assert_eq!(delivery.message.username, "alice");
    }

    #[test]
    fn test_decode_push_pmessage_uses_concrete_channel() {
        let frame = Value::Array(vec![
            Value::Bulk(b"pmessage".to_vec()),
            Value::Bulk(b"news.*".to_vec()),
            Value::Bulk(b"news.tech".to_vec()),
            Value::Bulk(br#"{"username":"bob","message":"hello"}"#.to_vec()),
        ]);
        let delivery = RedisSubscription::decode_push(frame).unwrap();
        assert_eq!(delivery.channel, "news.tech");
    }

    #[test]
    fn test_decode_push_skips_subscribe_ack() {
        let frame = Value::Array(vec![
            Value::Bulk(b"subscribe".to_vec()),
            Value::Bulk(b"general".to_vec()),
            Value::Int(1),
        ]);
        assert!(RedisSubscription::decode_push(frame).is_none());
    }

    #[test]
    fn test_decode_push_skips_malformed_payload() {
        let frame = Value::Array(vec![
            Value::Bulk(b"message".to_vec()),
            Value::Bulk(b"general".to_vec()),
            Value::Bulk(b"not json".to_vec()),
        ]);
        assert!(RedisSubscription::decode_push(frame).is_none());
    }
}
