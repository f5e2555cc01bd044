//! Cookie parsing and `Set-Cookie` serialization.

use std::fmt;

/// The `Expires` date sent on deletion cookies.
pub const EXPIRES_DELETED: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// A response cookie.
///
/// Created through [`ServerResponse::set_cookie`][crate::ServerResponse::set_cookie];
/// the returned reference can be used to adjust attributes before the
/// response head is written.
#[derive(Clone, Debug)]
pub struct Cookie {
    pub(crate) name: String,
    pub(crate) value: String,
    pub(crate) path: Option<String>,
    pub(crate) domain: Option<String>,
    pub(crate) max_age: Option<i64>,
    pub(crate) expires: Option<String>,
    pub(crate) secure: bool,
    pub(crate) http_only: bool,
}

impl Cookie {
    /// Creates a cookie with the default path `/`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            path: Some("/".to_string()),
            domain: None,
            max_age: None,
            expires: None,
            secure: false,
            http_only: false,
        }
    }

    /// Creates an immediate-expiry cookie that deletes `name` on the client.
    pub fn expired(name: impl Into<String>) -> Self {
        let mut cookie = Cookie::new(name, "");
        cookie.max_age = Some(0);
        cookie.expires = Some(EXPIRES_DELETED.to_string());
        cookie
    }

    /// The cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cookie value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Sets the `Path` attribute.
    pub fn set_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the `Domain` attribute.
    pub fn set_domain(&mut self, domain: impl Into<String>) -> &mut Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the `Max-Age` attribute in seconds.
    pub fn set_max_age(&mut self, seconds: i64) -> &mut Self {
        self.max_age = Some(seconds);
        self
    }

    /// Sets the `Secure` attribute.
    pub fn set_secure(&mut self, secure: bool) -> &mut Self {
        self.secure = secure;
        self
    }

    /// Sets the `HttpOnly` attribute.
    pub fn set_http_only(&mut self, http_only: bool) -> &mut Self {
        self.http_only = http_only;
        self
    }

    /// Renders the `Set-Cookie` header value.
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        let _ = fmt::Write::write_fmt(&mut out, format_args!("{}={}", self.name, self.value));
        if let Some(ref path) = self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(ref domain) = self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            let _ = fmt::Write::write_fmt(&mut out, format_args!("; Max-Age={max_age}"));
        }
        if let Some(ref expires) = self.expires {
            out.push_str("; Expires=");
            out.push_str(expires);
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// The cookies received on a request, in header order.
///
/// Cookie names may repeat; single-key access returns the first
/// occurrence.
#[derive(Clone, Debug, Default)]
pub struct CookieJar {
    pairs: Vec<(String, String)>,
}

impl CookieJar {
    /// The first value sent for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value sent for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates all `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of cookie pairs received.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether no cookies were received.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Parses one `Cookie:` header value, appending in order.
    pub(crate) fn parse_header(&mut self, value: &str) {
        for pair in value.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((name, value)) => self
                    .pairs
                    .push((name.trim().to_string(), value.trim().to_string())),
                None => self.pairs.push((pair.to_string(), String::new())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_attributes() {
        let mut cookie = Cookie::new("sid", "abc");
        cookie.set_path("/app").set_secure(true).set_http_only(true);
        assert_eq!(cookie.render(), "sid=abc; Path=/app; Secure; HttpOnly");
    }

    #[test]
    fn deletion_cookie_shape() {
        let cookie = Cookie::expired("sid");
        assert_eq!(
            cookie.render(),
            "sid=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"
        );
    }

    #[test]
    fn jar_preserves_order_and_first_wins() {
        let mut jar = CookieJar::default();
        jar.parse_header("a=1; b=2; a=3");
        assert_eq!(jar.get("a"), Some("1"));
        assert_eq!(jar.get_all("a").collect::<Vec<_>>(), vec!["1", "3"]);
        assert_eq!(jar.len(), 3);
    }

    #[test]
    fn jar_tolerates_bare_names() {
        let mut jar = CookieJar::default();
        jar.parse_header("flag; a=1");
        assert_eq!(jar.get("flag"), Some(""));
        assert_eq!(jar.get("a"), Some("1"));
    }
}
