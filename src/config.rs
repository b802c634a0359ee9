use rdkafka::*;
use rdkafka::config::RDKafkaLogLevel;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Prefix of environment variables copied verbatim into the client configuration.
/// `KAFKA_CONFIG_SECURITY_PROTOCOL=SSL` becomes `security.protocol=SSL`.
pub const CLIENT_OVERRIDE_PREFIX: &str = "KAFKA_CONFIG_";

/// Kafka client configuration shared by every consumer, producer and admin client of a task.
#[derive(Clone, Debug)]
pub struct Config(pub(crate) ClientConfig);

impl Config {
    pub fn new() -> Config {
        Config(ClientConfig::new())
    }

    pub fn set(mut self, key: &str, value: &str) -> Config {
        self.0.set(key, value);
        self
    }

    pub fn set_group(self, group: &str) -> Config {
        self.set("group.id", group)
    }

    pub fn set_log_level(mut self, log_level: RDKafkaLogLevel) -> Config {
        self.0.set_log_level(log_level);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)
    }

    /// Applies `KAFKA_CONFIG_*` style overrides, lower-casing the remainder and mapping `_` to `.`.
    pub fn with_overrides<I>(mut self, vars: I) -> Config
        where I: IntoIterator<Item=(String, String)>
    {
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(CLIENT_OVERRIDE_PREFIX) {
                if name.is_empty() {
                    continue;
                }
                let property = name.to_ascii_lowercase().replace('_', ".");
                self.0.set(property, value);
            }
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is not valid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Topic layout and join parameters of the certificate topology.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologySettings {
    pub application_id: String,
    pub primary_topics: Vec<String>,
    pub outcome_topic: String,
    pub sink_topic: String,
    pub join_window: Duration,
    pub stream_threads: usize,
    pub shutdown_timeout: Duration,
}

impl TopologySettings {
    pub const JOIN_WINDOW: Duration = Duration::from_secs(14 * 24 * 60 * 60);
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn source_topics(&self) -> Vec<String> {
        let mut topics = self.primary_topics.clone();
        topics.push(self.outcome_topic.clone());
        topics
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
}

impl HttpSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }
        let ip: IpAddr = self.host.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            name: "HTTP_HOST",
            reason: e.to_string(),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Everything the process needs at startup, read from the environment.
#[derive(Debug, Clone)]
pub struct Environment {
    pub brokers: String,
    pub client_id: String,
    pub topology: TopologySettings,
    pub http: HttpSettings,
    pub client_overrides: Vec<(String, String)>,
}

impl Environment {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
        where I: IntoIterator<Item=(String, String)>
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let lookup = |name: &str| {
            vars.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));

        let primary_topics: Vec<String> = required("PRIMARY_TOPICS")?
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if primary_topics.is_empty() {
            return Err(ConfigError::Missing("PRIMARY_TOPICS"));
        }

        let stream_threads = match lookup("STREAM_THREADS") {
            Some(v) => v.parse::<usize>().ok().filter(|n| *n > 0).ok_or(ConfigError::Invalid {
                name: "STREAM_THREADS",
                reason: format!("expected a positive integer, got {:?}", v),
            })?,
            None => 1,
        };

        let port = match lookup("HTTP_PORT") {
            Some(v) => v.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "HTTP_PORT",
                reason: e.to_string(),
            })?,
            None => 8080,
        };

        let overrides = vars.iter()
            .filter(|(k, _)| k.starts_with(CLIENT_OVERRIDE_PREFIX))
            .cloned()
            .collect();

        Ok(Environment {
            brokers: required("KAFKA_BROKERS")?,
            client_id: lookup("KAFKA_CLIENT_ID").unwrap_or_else(|| "smsak-stream".to_string()),
            topology: TopologySettings {
                application_id: lookup("APPLICATION_ID").unwrap_or_else(|| "smsak-stream".to_string()),
                primary_topics,
                outcome_topic: required("OUTCOME_TOPIC")?,
                sink_topic: required("SINK_TOPIC")?,
                join_window: TopologySettings::JOIN_WINDOW,
                stream_threads,
                shutdown_timeout: TopologySettings::SHUTDOWN_TIMEOUT,
            },
            http: HttpSettings {
                host: lookup("HTTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
            },
            client_overrides: overrides,
        })
    }

    /// Client configuration for the stream workers.
    ///
    /// Offsets are stored by the workers once a record is fully processed and committed
    /// by the client's auto-commit. The `range` assignor keeps partition `p` of every
    /// co-partitioned input topic on the same consumer.
    pub fn kafka_config(&self) -> Config {
        Config::new()
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &format!("{}-{}", self.client_id, self.topology.application_id))
            .set_group(&self.topology.application_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("partition.assignment.strategy", "range")
            .set_log_level(RDKafkaLogLevel::Warning)
            .with_overrides(self.client_overrides.clone())
    }
}
