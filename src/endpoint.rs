use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

/// Address of the remote party a channel connects to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Ipc(PathBuf),
    Inproc(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Ipc,
    Inproc,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Ipc => "ipc",
            Scheme::Inproc => "inproc",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            Endpoint::Tcp { .. } => Scheme::Tcp,
            Endpoint::Ipc(_) => Scheme::Ipc,
            Endpoint::Inproc(_) => Scheme::Inproc,
        }
    }
}

fn parse_tcp(raw: &str, rest: &str) -> Result<Endpoint, ConnectionError> {
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| ConnectionError::invalid(raw, "missing port"))?;
    if host.is_empty() {
        return Err(ConnectionError::invalid(raw, "missing host"));
    }
    if host.chars().any(char::is_whitespace) {
        return Err(ConnectionError::invalid(raw, "host contains whitespace"));
    }
    if host.starts_with('[') != host.ends_with(']') {
        return Err(ConnectionError::invalid(raw, "unbalanced IPv6 brackets"));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| ConnectionError::invalid(raw, format!("bad port {:?}", port)))?;
    if port == 0 {
        return Err(ConnectionError::invalid(raw, "port 0 is not connectable"));
    }
    Ok(Endpoint::tcp(host, port))
}

impl FromStr for Endpoint {
    type Err = ConnectionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| ConnectionError::invalid(raw, "missing scheme"))?;
        match scheme {
            "tcp" => parse_tcp(raw, rest),
            "ipc" | "inproc" if rest.is_empty() => {
                Err(ConnectionError::invalid(raw, "empty address"))
            }
            "ipc" => Ok(Endpoint::Ipc(PathBuf::from(rest))),
            "inproc" => Ok(Endpoint::Inproc(rest.to_owned())),
            other => Err(ConnectionError::invalid(
                raw,
                format!("unsupported scheme {:?}", other),
            )),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Inproc(name) => write!(f, "inproc://{}", name),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ConnectionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

#[test]
fn test_parse_tcp() {
    let endpoint: Endpoint = "tcp://localhost:5556".parse().unwrap();
    assert_eq!(endpoint, Endpoint::tcp("localhost", 5556));
    assert_eq!(endpoint.scheme(), Scheme::Tcp);
    assert_eq!(endpoint.to_string(), "tcp://localhost:5556");
}

#[test]
fn test_parse_tcp_ipv6() {
    let endpoint: Endpoint = "tcp://[::1]:1234".parse().unwrap();
    assert_eq!(endpoint, Endpoint::tcp("[::1]", 1234));
    assert_eq!(endpoint.to_string(), "tcp://[::1]:1234");
}

#[test]
fn test_parse_ipc_and_inproc() {
    let ipc: Endpoint = "ipc:///tmp/hello.sock".parse().unwrap();
    assert_eq!(ipc, Endpoint::Ipc(PathBuf::from("/tmp/hello.sock")));
    assert_eq!(ipc.to_string(), "ipc:///tmp/hello.sock");

    let inproc: Endpoint = "inproc://hello".parse().unwrap();
    assert_eq!(inproc.scheme(), Scheme::Inproc);
    assert_eq!(inproc.to_string(), "inproc://hello");
}

#[test]
fn test_parse_rejects_malformed() {
    for raw in [
        "localhost:5556",
        "udp://localhost:5556",
        "tcp://localhost",
        "tcp://:5556",
        "tcp://localhost:0",
        "tcp://localhost:*",
        "tcp://localhost:70000",
        "tcp://local host:5556",
        "tcp://[::1:5556",
        "ipc://",
        "inproc://",
    ] {
        assert!(
            matches!(
                raw.parse::<Endpoint>(),
                Err(ConnectionError::InvalidEndpoint { .. })
            ),
            "{} should be rejected",
            raw
        );
    }
}
