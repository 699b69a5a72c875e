//! Hybrid repository location syntax.
//!
//! `protocol-stack://[user[:pass]@]host[:port]:path[#ref]` for SSH-style
//! sources, where the authority and path are separated by a colon and the
//! protocol stack may hold several `+`-joined tags (`git+ssh`). Any stack
//! containing `https` is parsed as a standard URL instead, with a
//! slash-rooted path.
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use url::Url;

const PROTOCOL_SEPARATOR: &str = "://";
const REPOSITORY_TAG: &str = "git";

/// Which grammar produced a location. The two paths never share parsing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationForm {
    Ssh,
    Https,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationUrl {
    form: LocationForm,
    protocol_stack: Vec<String>,
    user: String,
    password: String,
    host: String,
    port: String,
    path: String,
    reference: String,
}

impl LocationUrl {
    pub fn parse(location: &str) -> Result<Self> {
        let (stack, remainder) =
            location
                .split_once(PROTOCOL_SEPARATOR)
                .ok_or_else(|| Error::MalformedLocation {
                    location: location.to_string(),
                    reason: "missing protocol separator".to_string(),
                })?;
        let protocol_stack: Vec<String> = stack.split('+').map(str::to_string).collect();
        if protocol_stack.iter().any(|tag| tag.is_empty()) {
            return Err(Error::MalformedLocation {
                location: location.to_string(),
                reason: "empty protocol tag".to_string(),
            });
        }
        if protocol_stack.iter().any(|tag| tag == "https") {
            parse_https(location, protocol_stack, remainder)
        } else {
            parse_ssh(location, protocol_stack, remainder)
        }
    }

    pub fn form(&self) -> LocationForm {
        self.form
    }

    pub fn protocol_stack(&self) -> &[String] {
        &self.protocol_stack
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Branch, tag or commit; empty means the default branch.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Transport protocol: the first tag that is not the repository tag.
    pub fn protocol(&self) -> &str {
        self.protocol_stack
            .iter()
            .map(String::as_str)
            .find(|tag| *tag != REPOSITORY_TAG)
            .unwrap_or("ssh")
    }

    pub fn is_repository(&self) -> bool {
        self.protocol_stack.iter().any(|tag| tag == REPOSITORY_TAG)
    }

    /// Path portion of the repository boundary.
    ///
    /// Segments accumulate until one ends in `.git` or two have been taken.
    /// This is a heuristic: nested groups without a `.git` suffix
    /// (`group/sub/repo/file`) are cut after `group/sub`.
    pub fn base_path(&self) -> &str {
        let (lead, segments) = match self.path.strip_prefix('/') {
            Some(rest) => (1, rest),
            None => (0, self.path.as_str()),
        };
        let mut end = lead;
        for (taken, segment) in segments.split('/').enumerate() {
            if taken > 0 {
                end += 1;
            }
            end += segment.len();
            if segment.ends_with(".git") || taken + 1 >= 2 {
                break;
            }
        }
        &self.path[..end.min(self.path.len())]
    }

    /// Path of the addressed file inside the repository.
    pub fn inner_path(&self) -> &str {
        let rest = &self.path[self.base_path().len()..];
        rest.strip_prefix('/').unwrap_or(rest)
    }

    /// Canonical repository address: protocol, auth, host, port and base path.
    pub fn repository_identity(&self) -> String {
        let mut out = String::new();
        self.write_authority(&mut out);
        self.write_path(&mut out, self.base_path());
        out
    }

    /// Address handed to the repository tool when cloning. SSH-form
    /// addresses carry no password; credentials come from the SSH agent.
    pub fn clone_url(&self) -> String {
        let base = self.base_path();
        match self.form {
            LocationForm::Https => {
                let mut out = format!("https://{}{}", self.auth_prefix(), self.host);
                if !self.port.is_empty() {
                    out.push(':');
                    out.push_str(&self.port);
                }
                out.push_str(base);
                out
            }
            LocationForm::Ssh => {
                let user = if self.user.is_empty() {
                    String::new()
                } else {
                    format!("{}@", self.user)
                };
                if self.port.is_empty() {
                    format!("{user}{}:{base}", self.host)
                } else {
                    format!(
                        "ssh://{user}{}:{}/{}",
                        self.host,
                        self.port,
                        base.trim_start_matches('/')
                    )
                }
            }
        }
    }

    fn auth_prefix(&self) -> String {
        match (self.user.is_empty(), self.password.is_empty()) {
            (true, true) => String::new(),
            (true, false) => format!(":{}@", self.password),
            (false, true) => format!("{}@", self.user),
            (false, false) => format!("{}:{}@", self.user, self.password),
        }
    }

    fn write_authority(&self, out: &mut String) {
        out.push_str(&self.protocol_stack.join("+"));
        out.push_str(PROTOCOL_SEPARATOR);
        out.push_str(&self.auth_prefix());
        out.push_str(&self.host);
        if !self.port.is_empty() {
            out.push(':');
            out.push_str(&self.port);
        }
    }

    fn write_path(&self, out: &mut String, path: &str) {
        match self.form {
            LocationForm::Https => out.push_str(path),
            LocationForm::Ssh => {
                if !path.is_empty() {
                    out.push(':');
                    out.push_str(path);
                }
            }
        }
    }
}

impl fmt::Display for LocationUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_authority(&mut out);
        if self.form == LocationForm::Ssh
            && self.path.is_empty()
            && (!self.port.is_empty() || !self.reference.is_empty())
        {
            out.push(':');
        }
        self.write_path(&mut out, &self.path);
        if !self.reference.is_empty() {
            out.push('#');
            out.push_str(&self.reference);
        }
        f.write_str(&out)
    }
}

impl FromStr for LocationUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LocationUrl::parse(s)
    }
}

/// True when the source names a repository rather than a plain document.
pub fn is_repository_location(source: &str) -> bool {
    source
        .split_once(PROTOCOL_SEPARATOR)
        .is_some_and(|(stack, _)| stack.split('+').any(|tag| tag == REPOSITORY_TAG))
}

fn parse_https(location: &str, protocol_stack: Vec<String>, remainder: &str) -> Result<LocationUrl> {
    let url = Url::parse(&format!("https://{remainder}")).map_err(|err| {
        Error::MalformedLocation {
            location: location.to_string(),
            reason: err.to_string(),
        }
    })?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| Error::MalformedLocation {
            location: location.to_string(),
            reason: "missing host".to_string(),
        })?;
    Ok(LocationUrl {
        form: LocationForm::Https,
        protocol_stack,
        user: url.username().to_string(),
        password: url.password().unwrap_or_default().to_string(),
        host: host.to_string(),
        port: url.port().map(|port| port.to_string()).unwrap_or_default(),
        path: url.path().to_string(),
        reference: url.fragment().unwrap_or_default().to_string(),
    })
}

fn parse_ssh(location: &str, protocol_stack: Vec<String>, remainder: &str) -> Result<LocationUrl> {
    let (user, password, host_port_path) = match remainder.split_once('@') {
        Some((auth, rest)) => {
            let (user, password) = auth.split_once(':').unwrap_or((auth, ""));
            (user, password, rest)
        }
        None => ("", "", remainder),
    };

    let tokens: Vec<&str> = host_port_path.split(':').collect();
    let (host, port, path_ref) = match tokens.as_slice() {
        [host] => (*host, "", ""),
        [host, path_ref] => (*host, "", *path_ref),
        [host, port, path_ref] => (*host, *port, *path_ref),
        _ => {
            return Err(Error::TooManyColons {
                location: location.to_string(),
            })
        }
    };
    if host.is_empty() {
        return Err(Error::MalformedLocation {
            location: location.to_string(),
            reason: "missing host".to_string(),
        });
    }
    if !port.is_empty() && port.parse::<u16>().is_err() {
        return Err(Error::MalformedLocation {
            location: location.to_string(),
            reason: format!("invalid port {port:?}"),
        });
    }
    let (path, reference) = path_ref.split_once('#').unwrap_or((path_ref, ""));

    Ok(LocationUrl {
        form: LocationForm::Ssh,
        protocol_stack,
        user: user.to_string(),
        password: password.to_string(),
        host: host.to_string(),
        port: port.to_string(),
        path: path.to_string(),
        reference: reference.to_string(),
    })
}

#[cfg(test)]
#[path = "location_tests.rs"]
mod tests;
