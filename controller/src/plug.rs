use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

use tempctl_common::{Actuator, ActuatorError};

const DEFAULT_PORT: u16 = 9999;
const INITIAL_KEY: u8 = 171;
const MAX_REPLY_BYTES: usize = 64 * 1024;
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// TP-Link HS110 style smart plug reached over its local TCP protocol.
pub struct Hs110Plug {
    address: String,
    target: String,
    timeout: Duration,
}

impl Hs110Plug {
    /// Accepts `host`, `host:port`, `[v6]` or `[v6]:port`. No connection is
    /// made here.
    pub fn new(address: &str) -> Result<Self, ActuatorError> {
        let address = address.trim();
        let invalid = || ActuatorError::InvalidAddress(address.to_string());

        let (host, port) = match address.strip_prefix('[') {
            Some(rest) => {
                let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
                let port = match tail {
                    "" => None,
                    _ => Some(tail.strip_prefix(':').ok_or_else(invalid)?),
                };
                (format!("[{host}]"), port)
            }
            None => match address.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), Some(port)),
                None => (address.to_string(), None),
            },
        };

        // An unbracketed IPv6 literal would otherwise split at its last colon.
        if host.is_empty() || host == "[]" || (!host.starts_with('[') && host.contains(':')) {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };
        if port == 0 {
            return Err(invalid());
        }
        let target = format!("{host}:{port}");

        Ok(Self {
            address: address.to_string(),
            target,
            timeout: EXCHANGE_TIMEOUT,
        })
    }

    async fn send(&self, command: &Value) -> Result<Value, ActuatorError> {
        let payload = serde_json::to_vec(command)
            .map_err(|err| ActuatorError::Protocol(format!("encoding command: {err}")))?;

        let reply = timeout(self.timeout, self.exchange(&payload))
            .await
            .map_err(|_| ActuatorError::Timeout(self.timeout))??;

        serde_json::from_slice(&reply)
            .map_err(|err| ActuatorError::Protocol(format!("decoding reply: {err}")))
    }

    async fn exchange(&self, payload: &[u8]) -> Result<Vec<u8>, ActuatorError> {
        let mut stream = TcpStream::connect(&self.target).await?;
        stream.write_all(&frame(payload)).await?;

        let len = stream.read_u32().await? as usize;
        if len > MAX_REPLY_BYTES {
            return Err(ActuatorError::Protocol(format!(
                "reply of {len} bytes exceeds limit"
            )));
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok(decrypt(&body))
    }

    async fn set_relay(&self, on: bool) -> Result<(), ActuatorError> {
        let state = u8::from(on);
        let reply = self
            .send(&json!({"system": {"set_relay_state": {"state": state}}}))
            .await?;
        debug!("plug {} set_relay_state {state}: {reply}", self.address);

        match reply["system"]["set_relay_state"]["err_code"].as_i64() {
            Some(0) => Ok(()),
            Some(code) => Err(ActuatorError::Protocol(format!(
                "set_relay_state returned err_code {code}"
            ))),
            None => Err(ActuatorError::Protocol(format!(
                "unexpected set_relay_state reply: {reply}"
            ))),
        }
    }
}

#[async_trait]
impl Actuator for Hs110Plug {
    fn address(&self) -> &str {
        &self.address
    }

    async fn probe(&self) -> Result<(), ActuatorError> {
        let reply = self
            .send(&json!({"system": {"get_sysinfo": {}}}))
            .await?;
        let sysinfo = &reply["system"]["get_sysinfo"];
        if !sysinfo.is_object() {
            return Err(ActuatorError::Protocol(format!(
                "unexpected get_sysinfo reply: {reply}"
            )));
        }
        match sysinfo["err_code"].as_i64() {
            None | Some(0) => Ok(()),
            Some(code) => Err(ActuatorError::Protocol(format!(
                "get_sysinfo returned err_code {code}"
            ))),
        }
    }

    async fn turn_on(&self) -> Result<(), ActuatorError> {
        self.set_relay(true).await
    }

    async fn turn_off(&self) -> Result<(), ActuatorError> {
        self.set_relay(false).await
    }
}

/// XOR autokey cipher: each output byte becomes the key for the next one.
pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    plain
        .iter()
        .map(|byte| {
            key ^= byte;
            key
        })
        .collect()
}

pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    cipher
        .iter()
        .map(|&byte| {
            let plain = key ^ byte;
            key = byte;
            plain
        })
        .collect()
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let body = encrypt(payload);
    let mut framed = Vec::with_capacity(body.len() + 4);
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(&body);
    framed
}
