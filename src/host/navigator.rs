//! `navigator`, `screen`, `location` and `history`
//!
//! All four are derived from the [`Profile`]. They are plain property bags
//! with masked methods; nothing here holds state beyond `history.state`.

use std::rc::Rc;

use crate::disguise::native;
use crate::profile::Profile;
use crate::value::{arg, PlainObject, Value};

/// Taskbar height subtracted from `screen.availHeight`
const TASKBAR_HEIGHT: u32 = 40;

const PDF_PLUGINS: &[&str] = &[
    "PDF Viewer",
    "Chrome PDF Viewer",
    "Chromium PDF Viewer",
    "Microsoft Edge PDF Viewer",
    "WebKit built-in PDF",
];

const PDF_MIME_TYPES: &[&str] = &["application/pdf", "text/pdf"];

/// Components of an absolute URL, named as `location` names them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
    /// Scheme with trailing colon, `https:`
    pub protocol: String,
    /// `hostname[:port]`
    pub host: String,
    pub hostname: String,
    pub port: String,
    pub pathname: String,
    /// Query with leading `?`, or empty
    pub search: String,
    /// Fragment with leading `#`, or empty
    pub hash: String,
    pub origin: String,
    pub href: String,
}

impl UrlParts {
    /// Split `url`. Input without a scheme yields a path-only result.
    pub fn parse(url: &str) -> Self {
        let (protocol, rest) = match url.split_once("://") {
            Some((scheme, rest)) => (format!("{}:", scheme.to_ascii_lowercase()), rest),
            None => (String::new(), url),
        };

        let (rest, hash) = match rest.find('#') {
            Some(i) => (&rest[..i], rest[i..].to_string()),
            None => (rest, String::new()),
        };
        let (rest, search) = match rest.find('?') {
            Some(i) => (&rest[..i], rest[i..].to_string()),
            None => (rest, String::new()),
        };

        let (host, pathname) = if protocol.is_empty() {
            (String::new(), rest.to_string())
        } else {
            match rest.find('/') {
                Some(i) => (rest[..i].to_string(), rest[i..].to_string()),
                None => (rest.to_string(), "/".to_string()),
            }
        };
        let host = host.rsplit('@').next().unwrap_or_default().to_string();
        let (hostname, port) = match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                (name.to_string(), port.to_string())
            }
            _ => (host.clone(), String::new()),
        };

        let origin = if protocol.is_empty() {
            String::new()
        } else {
            format!("{}//{}", protocol, host)
        };
        let href = format!("{}{}{}{}", origin, pathname, search, hash);

        Self {
            protocol,
            host,
            hostname,
            port,
            pathname,
            search,
            hash,
            origin,
            href,
        }
    }

    /// Resolve `reference` against this URL
    pub fn join(&self, reference: &str) -> String {
        let reference = reference.trim();
        if reference.contains("://") {
            reference.to_string()
        } else if let Some(rest) = reference.strip_prefix("//") {
            format!("{}//{}", self.protocol, rest)
        } else if reference.starts_with('/') {
            format!("{}{}", self.origin, reference)
        } else if reference.starts_with('?') {
            format!("{}{}{}", self.origin, self.pathname, reference)
        } else if reference.starts_with('#') {
            format!("{}{}{}{}", self.origin, self.pathname, self.search, reference)
        } else if reference.is_empty() {
            self.href.clone()
        } else {
            let directory = match self.pathname.rfind('/') {
                Some(i) => &self.pathname[..=i],
                None => "/",
            };
            format!("{}{}{}", self.origin, directory, reference)
        }
    }
}

fn boxed(object: PlainObject) -> Value {
    Value::from_host(Rc::new(object))
}

fn strings(items: &[String]) -> Value {
    boxed(PlainObject::array(items.iter().map(Value::from).collect()))
}

fn plugins() -> Value {
    let items = PDF_PLUGINS
        .iter()
        .map(|name| {
            boxed(PlainObject::with_props(
                "Plugin",
                [
                    ("name", Value::from(*name)),
                    ("filename", Value::from("internal-pdf-viewer")),
                    ("description", Value::from("Portable Document Format")),
                    ("length", Value::from(1)),
                ],
            ))
        })
        .collect::<Vec<_>>();
    let array = PlainObject::array_like("PluginArray", items.clone());
    array.insert(
        "namedItem",
        native("namedItem", move |_, args| {
            let wanted = arg(args, 0).to_js_string();
            Ok(items
                .iter()
                .find(|plugin| plugin.get_or_undefined("name").as_str() == Some(wanted.as_str()))
                .cloned()
                .unwrap_or(Value::Null))
        }),
    );
    array.insert("refresh", native("refresh", |_, _| Ok(Value::Undefined)));
    boxed(array)
}

/// `navigator.mimeTypes`, both PDF types backed by the first plugin
fn mime_types(plugins: &Value) -> Value {
    let enabled = plugins.get_or_undefined("0");
    let items = PDF_MIME_TYPES
        .iter()
        .map(|kind| {
            boxed(PlainObject::with_props(
                "MimeType",
                [
                    ("type", Value::from(*kind)),
                    ("suffixes", Value::from("pdf")),
                    ("description", Value::from("Portable Document Format")),
                    ("enabledPlugin", enabled.clone()),
                ],
            ))
        })
        .collect::<Vec<_>>();
    let array = PlainObject::array_like("MimeTypeArray", items.clone());
    let by_index = items.clone();
    array.insert(
        "item",
        native("item", move |_, args| {
            let index = arg(args, 0).to_number();
            Ok(if index >= 0.0 && index.fract() == 0.0 {
                by_index.get(index as usize).cloned().unwrap_or(Value::Null)
            } else {
                Value::Null
            })
        }),
    );
    array.insert(
        "namedItem",
        native("namedItem", move |_, args| {
            let wanted = arg(args, 0).to_js_string();
            Ok(items
                .iter()
                .find(|mime| mime.get_or_undefined("type").as_str() == Some(wanted.as_str()))
                .cloned()
                .unwrap_or(Value::Null))
        }),
    );
    boxed(array)
}

/// `navigator`. `webdriver` is always `false`.
pub fn navigator(profile: &Profile) -> Value {
    let user_agent = profile.user_agent.as_str();
    let app_version = user_agent.strip_prefix("Mozilla/").unwrap_or(user_agent);
    let languages = if profile.languages.is_empty() {
        vec![profile.locale.clone()]
    } else {
        profile.languages.clone()
    };

    let connection = PlainObject::with_props(
        "NetworkInformation",
        [
            ("effectiveType", Value::from("4g")),
            ("rtt", Value::from(50)),
            ("downlink", Value::from(10)),
            ("saveData", Value::Bool(false)),
            ("onchange", Value::Null),
        ],
    );

    let plugins = plugins();
    let navigator = PlainObject::with_props(
        "Navigator",
        [
            ("userAgent", Value::from(user_agent)),
            ("platform", Value::from(profile.platform())),
            ("appCodeName", Value::from("Mozilla")),
            ("appName", Value::from("Netscape")),
            ("appVersion", Value::from(app_version)),
            ("product", Value::from("Gecko")),
            ("productSub", Value::from("20030107")),
            ("vendor", Value::from("Google Inc.")),
            ("vendorSub", Value::from("")),
            ("language", Value::from(&profile.locale)),
            ("languages", strings(&languages)),
            ("cookieEnabled", Value::Bool(true)),
            ("onLine", Value::Bool(true)),
            ("hardwareConcurrency", Value::from(profile.hardware_concurrency)),
            ("deviceMemory", Value::from(profile.device_memory)),
            ("maxTouchPoints", Value::from(0)),
            ("doNotTrack", Value::Null),
            ("pdfViewerEnabled", Value::Bool(true)),
            ("webdriver", Value::Bool(false)),
            ("connection", boxed(connection)),
            ("mimeTypes", mime_types(&plugins)),
            ("plugins", plugins),
            ("javaEnabled", native("javaEnabled", |_, _| Ok(Value::Bool(false)))),
            ("sendBeacon", native("sendBeacon", |_, _| Ok(Value::Bool(true)))),
            ("vibrate", native("vibrate", |_, _| Ok(Value::Bool(true)))),
        ],
    );
    boxed(navigator)
}

/// `screen`
pub fn screen(profile: &Profile) -> Value {
    let orientation = PlainObject::with_props(
        "ScreenOrientation",
        [
            ("type", Value::from("landscape-primary")),
            ("angle", Value::from(0)),
        ],
    );
    boxed(PlainObject::with_props(
        "Screen",
        [
            ("width", Value::from(profile.screen_width)),
            ("height", Value::from(profile.screen_height)),
            ("availWidth", Value::from(profile.screen_width)),
            (
                "availHeight",
                Value::from(profile.screen_height.saturating_sub(TASKBAR_HEIGHT)),
            ),
            ("availLeft", Value::from(0)),
            ("availTop", Value::from(0)),
            ("colorDepth", Value::from(24)),
            ("pixelDepth", Value::from(24)),
            ("orientation", boxed(orientation)),
        ],
    ))
}

/// `location` for the profile URL. Navigation methods are no-ops.
pub fn location(url: &str) -> Value {
    let parts = UrlParts::parse(url);
    let href = parts.href.clone();
    boxed(PlainObject::with_props(
        "Location",
        [
            ("href", Value::from(&parts.href)),
            ("origin", Value::from(&parts.origin)),
            ("protocol", Value::from(&parts.protocol)),
            ("host", Value::from(&parts.host)),
            ("hostname", Value::from(&parts.hostname)),
            ("port", Value::from(&parts.port)),
            ("pathname", Value::from(&parts.pathname)),
            ("search", Value::from(&parts.search)),
            ("hash", Value::from(&parts.hash)),
            ("assign", native("assign", |_, _| Ok(Value::Undefined))),
            ("reload", native("reload", |_, _| Ok(Value::Undefined))),
            ("replace", native("replace", |_, _| Ok(Value::Undefined))),
            (
                "toString",
                native("toString", move |_, _| Ok(Value::from(href.as_str()))),
            ),
        ],
    ))
}

/// `history`. `pushState`/`replaceState` record the state object only.
pub fn history() -> Value {
    let history = Rc::new(PlainObject::with_props(
        "History",
        [
            ("length", Value::from(1)),
            ("state", Value::Null),
            ("scrollRestoration", Value::from("auto")),
        ],
    ));
    for name in ["back", "forward", "go"] {
        history.insert(name, native(name, |_, _| Ok(Value::Undefined)));
    }
    for name in ["pushState", "replaceState"] {
        let owner = Rc::downgrade(&history);
        history.insert(
            name,
            native(name, move |_, args| {
                if let Some(history) = owner.upgrade() {
                    history.insert("state", arg(args, 0));
                }
                Ok(Value::Undefined)
            }),
        );
    }
    Value::from_host(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disguise::presents_native;

    #[test]
    fn test_parse_full_url() {
        let parts = UrlParts::parse("https://user@example.com:8443/a/b.js?x=1#top");
        assert_eq!(parts.protocol, "https:");
        assert_eq!(parts.host, "example.com:8443");
        assert_eq!(parts.hostname, "example.com");
        assert_eq!(parts.port, "8443");
        assert_eq!(parts.pathname, "/a/b.js");
        assert_eq!(parts.search, "?x=1");
        assert_eq!(parts.hash, "#top");
        assert_eq!(parts.origin, "https://example.com:8443");
    }

    #[test]
    fn test_parse_bare_host() {
        let parts = UrlParts::parse("https://example.com");
        assert_eq!(parts.pathname, "/");
        assert_eq!(parts.href, "https://example.com/");
    }

    #[test]
    fn test_join_relative() {
        let base = UrlParts::parse("https://example.com/app/index.html?q=1");
        assert_eq!(base.join("/api"), "https://example.com/api");
        assert_eq!(base.join("data.json"), "https://example.com/app/data.json");
        assert_eq!(base.join("//cdn.test/x.js"), "https://cdn.test/x.js");
        assert_eq!(base.join("?z=2"), "https://example.com/app/index.html?z=2");
        assert_eq!(base.join("http://other.test/"), "http://other.test/");
    }

    #[test]
    fn test_navigator_from_profile() {
        let profile = Profile::default();
        let nav = navigator(&profile);
        assert!(nav.get_or_undefined("webdriver").strict_eq(&Value::Bool(false)));
        assert_eq!(nav.get_or_undefined("platform").as_str(), Some("Win32"));
        assert!(nav
            .get_or_undefined("appVersion")
            .as_str()
            .is_some_and(|v| v.starts_with("5.0 (Windows")));
        assert!(presents_native(&nav.get_or_undefined("javaEnabled")));
        let languages = nav.get_or_undefined("languages");
        assert_eq!(languages.get_or_undefined("0").as_str(), Some("en-US"));
    }

    #[test]
    fn test_plugins_named_item() {
        let nav = navigator(&Profile::default());
        let plugins = nav.get_or_undefined("plugins");
        assert!(plugins.get_or_undefined("length").strict_eq(&Value::from(5)));
        let found = plugins
            .call_method("namedItem", &[Value::from("Chrome PDF Viewer")])
            .unwrap();
        assert!(found.is_object());
        let missing = plugins.call_method("namedItem", &[Value::from("Flash")]).unwrap();
        assert!(matches!(missing, Value::Null));
    }

    #[test]
    fn test_mime_types_point_at_pdf_plugin() {
        let nav = navigator(&Profile::default());
        let mimes = nav.get_or_undefined("mimeTypes");
        assert!(mimes.get_or_undefined("length").strict_eq(&Value::from(2)));

        let pdf = mimes
            .call_method("namedItem", &[Value::from("application/pdf")])
            .unwrap();
        assert_eq!(pdf.get_or_undefined("suffixes").as_str(), Some("pdf"));
        let plugin = pdf.get_or_undefined("enabledPlugin");
        assert!(plugin.strict_eq(&nav.get_or_undefined("plugins").get_or_undefined("0")));

        let second = mimes.call_method("item", &[Value::from(1)]).unwrap();
        assert_eq!(second.get_or_undefined("type").as_str(), Some("text/pdf"));
        assert!(matches!(
            mimes.call_method("item", &[Value::from(7)]).unwrap(),
            Value::Null
        ));
    }

    #[test]
    fn test_location_to_string() {
        let loc = location("https://example.com/path?x=1");
        assert_eq!(loc.get_or_undefined("hostname").as_str(), Some("example.com"));
        let text = loc.call_method("toString", &[]).unwrap();
        assert_eq!(text.as_str(), Some("https://example.com/path?x=1"));
    }

    #[test]
    fn test_history_records_state() {
        let history = history();
        history
            .call_method("pushState", &[Value::from("s1"), Value::from("")])
            .unwrap();
        assert_eq!(history.get_or_undefined("state").as_str(), Some("s1"));
    }
}
