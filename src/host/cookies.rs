//! Cookie jar shared by `document.cookie` and the network collaborator
//!
//! Save the jar after a run and load it into the next one to carry state
//! across environments.

use std::cell::RefCell;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A stored cookie (simplified, serializable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub same_site: Option<String>,
    #[serde(default)]
    pub max_age: Option<i64>,
}

fn default_path() -> String {
    "/".to_string()
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: default_path(),
            secure: false,
            http_only: false,
            same_site: None,
            max_age: None,
        }
    }

    /// Parse `name=value; attr; attr=value`.
    ///
    /// Only the first pair is the cookie; the rest are attributes. A segment
    /// without `=` in first position is a cookie with an empty name.
    pub fn parse(raw: &str, default_domain: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let pair = parts.next()?.trim();
        if pair.is_empty() {
            return None;
        }
        let (name, value) = match pair.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => ("", pair),
        };

        let mut cookie = Cookie::new(name, value);
        cookie.domain = default_domain.to_string();
        for attribute in parts {
            let (key, value) = match attribute.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (attribute.trim(), ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "domain" if !value.is_empty() => {
                    cookie.domain = value.trim_start_matches('.').to_string()
                }
                "path" if !value.is_empty() => cookie.path = value.to_string(),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.same_site = Some(value.to_string()),
                "max-age" => cookie.max_age = value.parse().ok(),
                _ => {}
            }
        }
        Some(cookie)
    }

    /// `Max-Age` of zero or less deletes the cookie
    pub fn is_expired(&self) -> bool {
        self.max_age.is_some_and(|age| age <= 0)
    }

    fn pair(&self) -> String {
        if self.name.is_empty() {
            self.value.clone()
        } else {
            format!("{}={}", self.name, self.value)
        }
    }
}

/// Ordered name -> cookie store
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RefCell<IndexMap<String, Cookie>>,
    domain: String,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jar whose cookies default to `domain`
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            cookies: RefCell::default(),
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Store or replace `cookie`; an expired cookie removes its name instead
    pub fn insert(&self, cookie: Cookie) {
        let mut cookies = self.cookies.borrow_mut();
        if cookie.is_expired() {
            cookies.shift_remove(&cookie.name);
        } else {
            cookies.insert(cookie.name.clone(), cookie);
        }
    }

    /// `document.cookie = raw`. Script writes cannot create `HttpOnly` cookies.
    pub fn set_document_cookie(&self, raw: &str) {
        if let Some(cookie) = Cookie::parse(raw, &self.domain) {
            if !cookie.http_only {
                self.insert(cookie);
            }
        }
    }

    /// `document.cookie` as script reads it
    pub fn document_cookie(&self) -> String {
        self.cookies
            .borrow()
            .values()
            .filter(|c| !c.http_only)
            .map(Cookie::pair)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Apply one `Set-Cookie` response header
    pub fn set_from_header(&self, header: &str) {
        match Cookie::parse(header, &self.domain) {
            Some(cookie) => self.insert(cookie),
            None => tracing::debug!("Ignoring malformed Set-Cookie header: {}", header),
        }
    }

    /// Format every cookie as a `Cookie` request header value
    pub fn cookie_header(&self) -> String {
        self.cookies
            .borrow()
            .values()
            .map(Cookie::pair)
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn get(&self, name: &str) -> Option<Cookie> {
        self.cookies.borrow().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Cookie> {
        self.cookies.borrow_mut().shift_remove(name)
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        self.cookies.borrow().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.cookies.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.cookies.borrow_mut().clear();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.cookies())?)
    }

    /// Replace the jar's contents with `json`
    pub fn load_json(&self, json: &str) -> Result<()> {
        let cookies: Vec<Cookie> = serde_json::from_str(json)?;
        self.clear();
        for cookie in cookies {
            self.insert(cookie);
        }
        Ok(())
    }

    /// Save cookies to a JSON file
    pub fn save(&self, path: &str) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load cookies from a JSON file
    pub fn load(&self, path: &str) -> Result<()> {
        let json = std::fs::read_to_string(path)?;
        self.load_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attributes() {
        let cookie = Cookie::parse("sid=abc; Path=/app; Secure; HttpOnly; SameSite=Lax", "example.com")
            .unwrap();
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.domain, "example.com");
        assert_eq!(cookie.path, "/app");
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert_eq!(cookie.same_site.as_deref(), Some("Lax"));
    }

    #[test]
    fn test_document_cookie_accumulates() {
        let jar = CookieJar::new();
        jar.set_document_cookie("a=1; path=/");
        jar.set_document_cookie("b=2");
        jar.set_document_cookie("a=3");
        assert_eq!(jar.document_cookie(), "a=3; b=2");
    }

    #[test]
    fn test_max_age_deletes() {
        let jar = CookieJar::new();
        jar.set_document_cookie("a=1");
        jar.set_document_cookie("a=; max-age=0");
        assert!(jar.is_empty());
    }

    #[test]
    fn test_http_only_hidden_from_script() {
        let jar = CookieJar::for_domain("example.com");
        jar.set_from_header("session=s3cr3t; HttpOnly");
        jar.set_document_cookie("visible=1");
        assert_eq!(jar.document_cookie(), "visible=1");
        assert_eq!(jar.cookie_header(), "session=s3cr3t; visible=1");
    }

    #[test]
    fn test_json_round_trip() {
        let jar = CookieJar::for_domain("example.com");
        jar.set_from_header("a=1; Secure");
        let json = jar.to_json().unwrap();

        let restored = CookieJar::new();
        restored.load_json(&json).unwrap();
        assert_eq!(restored.cookies(), jar.cookies());
    }
}
