//! Host descriptors, clusters and host-spec parsing

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

/// Standard secure-shell port
pub const DEFAULT_PORT: u16 = 22;

/// User assumed when neither the host spec nor `$USER` names one
pub const FALLBACK_USER: &str = "root";

/// One remote endpoint targeted by a command
///
/// Identity is `(name, port, user)`; the password is an auth hint only.
#[derive(Clone, PartialEq, Eq)]
pub struct Host {
    /// Network name or address
    pub name: String,
    /// TCP port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Static password, offered after public keys
    pub password: Option<String>,
}

impl Host {
    /// Create a host with the default port and no password
    pub fn new(name: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: None,
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set a static password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Identity key of this host
    #[must_use]
    pub fn identity(&self) -> (&str, u16, &str) {
        (&self.name, self.port, &self.user)
    }

    /// `host:port` form suitable for a socket connect, bracketing IPv6
    #[must_use]
    pub fn address(&self) -> String {
        if self.name.contains(':') {
            format!("[{}]:{}", self.name, self.port)
        } else {
            format!("{}:{}", self.name, self.port)
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.address())
    }
}

// Keeps passwords out of logs.
impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Host-spec parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostParseError {
    #[error("empty host spec")]
    Empty,

    #[error("missing host name in '{0}'")]
    EmptyHost(String),

    #[error("empty user name in '{0}'")]
    EmptyUser(String),

    #[error("invalid port '{port}' in '{spec}'")]
    InvalidPort {
        /// Offending port text
        port: String,
        /// Full spec
        spec: String,
    },

    #[error("unterminated '[' in '{0}'")]
    UnterminatedBracket(String),
}

impl FromStr for Host {
    type Err = HostParseError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        parse_host_with_default_user(spec, &default_user())
    }
}

/// Parse `[user[:password]@]host[:port]` using `default_user` when no user is given
///
/// # Errors
/// Returns `HostParseError` for empty hosts or users, bad ports and unbalanced brackets.
/// A malformed spec never yields a partial host.
pub fn parse_host_with_default_user(spec: &str, default_user: &str) -> Result<Host, HostParseError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(HostParseError::Empty);
    }

    // Split on the last '@' so passwords may contain '@'
    let (userinfo, hostport) = match spec.rsplit_once('@') {
        Some((userinfo, hostport)) => (Some(userinfo), hostport),
        None => (None, spec),
    };

    let (user, password) = match userinfo {
        Some(info) => {
            let (user, password) = match info.split_once(':') {
                Some((user, password)) => (user, Some(password.to_string())),
                None => (info, None),
            };
            if user.is_empty() {
                return Err(HostParseError::EmptyUser(spec.to_string()));
            }
            (user.to_string(), password)
        }
        None => (default_user.to_string(), None),
    };

    let (name, port) = split_host_port(hostport, spec)?;
    if name.is_empty() {
        return Err(HostParseError::EmptyHost(spec.to_string()));
    }

    Ok(Host {
        name: name.to_string(),
        port,
        user,
        password,
    })
}

fn split_host_port<'a>(hostport: &'a str, spec: &str) -> Result<(&'a str, u16), HostParseError> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let (name, tail) = rest
            .split_once(']')
            .ok_or_else(|| HostParseError::UnterminatedBracket(spec.to_string()))?;
        return match tail {
            "" => Ok((name, DEFAULT_PORT)),
            _ => match tail.strip_prefix(':') {
                Some(port) => Ok((name, parse_port(port, spec)?)),
                None => Err(HostParseError::InvalidPort {
                    port: tail.to_string(),
                    spec: spec.to_string(),
                }),
            },
        };
    }

    match hostport.rsplit_once(':') {
        // Bare IPv6 literal without brackets
        Some((name, _)) if name.contains(':') => Ok((hostport, DEFAULT_PORT)),
        Some((name, port)) => Ok((name, parse_port(port, spec)?)),
        None => Ok((hostport, DEFAULT_PORT)),
    }
}

fn parse_port(port: &str, spec: &str) -> Result<u16, HostParseError> {
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(HostParseError::InvalidPort {
            port: port.to_string(),
            spec: spec.to_string(),
        }),
    }
}

/// Invoking user's name, else [`FALLBACK_USER`]
#[must_use]
pub fn default_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| FALLBACK_USER.to_string())
}

/// An ordered sequence of hosts
///
/// Duplicates are allowed and each entry runs independently.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    hosts: Vec<Arc<Host>>,
}

impl Cluster {
    /// Create a cluster from hosts
    pub fn new(hosts: impl IntoIterator<Item = Host>) -> Self {
        Self {
            hosts: hosts.into_iter().map(Arc::new).collect(),
        }
    }

    /// Parse every spec, failing on the first malformed one
    ///
    /// # Errors
    /// Returns the first `HostParseError` encountered
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self, HostParseError> {
        let hosts = specs
            .iter()
            .map(|s| s.as_ref().parse::<Host>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(hosts))
    }

    /// Hosts in submission order
    #[must_use]
    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl FromIterator<Host> for Cluster {
    fn from_iter<T: IntoIterator<Item = Host>>(iter: T) -> Self {
        Self::new(iter)
    }
}
