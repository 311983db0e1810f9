//! Request information handed to the limiter by the host.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
    Connect,
}

impl Method {
    /// Whether requests with this method are ever rate limited.
    ///
    /// Only GET, POST and DELETE are counted; every other method passes
    /// through regardless of route settings.
    pub fn is_limitable(&self) -> bool {
        matches!(self, Method::Get | Method::Post | Method::Delete)
    }

    /// Lowercase method name, as used in counter keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Head => "head",
            Method::Post => "post",
            Method::Put => "put",
            Method::Patch => "patch",
            Method::Delete => "delete",
            Method::Options => "options",
            Method::Trace => "trace",
            Method::Connect => "connect",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "head" => Ok(Method::Head),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "patch" => Ok(Method::Patch),
            "delete" => Ok(Method::Delete),
            "options" => Ok(Method::Options),
            "trace" => Ok(Method::Trace),
            "connect" => Ok(Method::Connect),
            other => Err(format!("unknown HTTP method: {other}")),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

/// Information about a request that may need to be rate limited.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Method of the matched route.
    pub method: Method,
    /// Path template of the matched route, e.g. `/users/{id}`.
    pub path: String,
    /// Identifier of the authenticated caller, if any.
    pub credentials: Option<String>,
    /// Address of the connecting peer.
    pub remote_addr: Option<IpAddr>,
    /// Request headers, keyed by lowercase name.
    pub headers: HashMap<String, String>,
}

impl RequestContext {
    /// Create a new builder for a request on the given route.
    pub fn builder(method: Method, path: impl Into<String>) -> RequestContextBuilder {
        RequestContextBuilder {
            method,
            path: path.into(),
            credentials: None,
            remote_addr: None,
            headers: HashMap::new(),
        }
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The route this request matched, as `<method>:<path>`.
    pub fn route(&self) -> String {
        format!("{}:{}", self.method, self.path)
    }
}

/// Builder for creating request contexts.
#[derive(Debug)]
pub struct RequestContextBuilder {
    method: Method,
    path: String,
    credentials: Option<String>,
    remote_addr: Option<IpAddr>,
    headers: HashMap<String, String>,
}

impl RequestContextBuilder {
    /// Set the authenticated caller identifier.
    pub fn credentials(mut self, id: impl Into<String>) -> Self {
        self.credentials = Some(id.into());
        self
    }

    /// Set the peer address.
    pub fn remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Add a request header.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Build the request context.
    pub fn build(self) -> RequestContext {
        RequestContext {
            method: self.method,
            path: self.path,
            credentials: self.credentials,
            remote_addr: self.remote_addr,
            headers: self.headers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing_is_case_insensitive() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("delete".parse::<Method>().unwrap(), Method::Delete);
        assert!("BREW".parse::<Method>().is_err());
    }

    #[test]
    fn test_limitable_methods() {
        let limited: Vec<Method> = [
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Patch,
            Method::Delete,
            Method::Options,
        ]
        .into_iter()
        .filter(Method::is_limitable)
        .collect();

        assert_eq!(limited, vec![Method::Get, Method::Post, Method::Delete]);
    }

    #[test]
    fn test_method_serde() {
        let method: Method = serde_yaml::from_str("POST").unwrap();
        assert_eq!(method, Method::Post);
        assert_eq!(serde_json::to_string(&Method::Get).unwrap(), "\"get\"");
    }

    #[test]
    fn test_request_builder() {
        let request = RequestContext::builder(Method::Get, "/users")
            .credentials("123")
            .header("X-Api-Key", "abc")
            .remote_addr("10.0.0.1".parse().unwrap())
            .build();

        assert_eq!(request.route(), "get:/users");
        assert_eq!(request.credentials.as_deref(), Some("123"));
        assert_eq!(request.header("x-api-key"), Some("abc"));
        assert_eq!(request.header("X-API-KEY"), Some("abc"));
    }
}
