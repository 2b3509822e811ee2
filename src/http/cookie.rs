//! `Set-Cookie` parsing.
//!
//! Servers (and proxies) sometimes fold several cookies into one header
//! separated by commas, while `Expires` dates carry commas of their own. A
//! comma only separates cookies when the next token reaches `=` before any
//! `;` or `,`.

use indexmap::IndexMap;
use serde::Serialize;
use time::{
    OffsetDateTime, PrimitiveDateTime, format_description::BorrowedFormatItem,
    format_description::well_known::Rfc2822, macros::format_description,
};

const IMF_FIXDATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short case_sensitive:false], [day] [month repr:short case_sensitive:false] [year] [hour]:[minute]:[second] GMT"
);

const NETSCAPE_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short case_sensitive:false], [day]-[month repr:short case_sensitive:false]-[year] [hour]:[minute]:[second] GMT"
);

/// One parsed cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Value, percent-decoded when that yields valid UTF-8.
    pub value: String,
    /// Expiry. Absent when unparseable or overridden by `Max-Age=0`.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires: Option<OffsetDateTime>,
    /// `Max-Age` in seconds.
    pub max_age: Option<i64>,
    /// `Secure` flag.
    pub secure: bool,
    /// `HttpOnly` flag.
    pub http_only: bool,
    /// `SameSite` policy as sent.
    pub same_site: Option<String>,
    /// `Path` scope.
    pub path: Option<String>,
    /// Any other attribute, keyed by its lower-cased name.
    pub attributes: IndexMap<String, String>,
}

/// Split one `Set-Cookie` value into individual cookie strings.
///
/// # Examples
/// ```
/// use qel::http::split_set_cookie;
///
/// let parts = split_set_cookie("a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT, b=2");
/// assert_eq!(parts, ["a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT", "b=2"]);
/// ```
#[must_use]
pub fn split_set_cookie(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (index, _) in header.match_indices(',') {
        let rest = header.get(index + 1..).unwrap_or_default();
        let next = rest.trim_start().chars().find(|c| matches!(c, '=' | ';' | ','));
        if next != Some('=') {
            continue;
        }
        push_part(&mut parts, header.get(start..index));
        start = index + 1;
    }
    push_part(&mut parts, header.get(start..));
    parts
}

fn push_part<'a>(parts: &mut Vec<&'a str>, part: Option<&'a str>) {
    if let Some(part) = part.map(str::trim).filter(|part| !part.is_empty()) {
        parts.push(part);
    }
}

/// Parse a single cookie string such as `id=a3f; Path=/; HttpOnly`.
///
/// Returns `None` when the leading `name=value` pair is missing.
#[must_use]
pub fn parse_cookie(text: &str) -> Option<Cookie> {
    let mut segments = text.split(';');
    let (name, value) = segments.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim();
    let mut cookie = Cookie {
        name: name.to_owned(),
        value: urlencoding::decode(value).map_or_else(|_| value.to_owned(), |v| v.into_owned()),
        ..Cookie::default()
    };

    for segment in segments {
        let (key, raw) = segment
            .split_once('=')
            .map_or((segment, ""), |(key, raw)| (key, raw));
        let key = key.trim().to_ascii_lowercase();
        let raw = raw.trim();
        match key.as_str() {
            "" => {}
            "expires" => match parse_cookie_date(raw) {
                Some(date) => cookie.expires = Some(date),
                None => {
                    cookie.attributes.insert(key, raw.to_owned());
                }
            },
            "max-age" => match raw.parse() {
                Ok(seconds) => cookie.max_age = Some(seconds),
                Err(_) => {
                    cookie.attributes.insert(key, raw.to_owned());
                }
            },
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "samesite" => cookie.same_site = Some(raw.to_owned()),
            "path" => cookie.path = Some(raw.to_owned()),
            _ => {
                cookie.attributes.insert(key, raw.to_owned());
            }
        }
    }

    if cookie.max_age == Some(0) {
        cookie.expires = None;
        cookie.attributes.shift_remove("expires");
    }
    Some(cookie)
}

/// Parse every `Set-Cookie` value, indexing cookies by name. Later cookies
/// replace earlier ones with the same name.
#[must_use]
pub fn parse_set_cookies<S: AsRef<str>>(headers: &[S]) -> IndexMap<String, Cookie> {
    headers
        .iter()
        .flat_map(|header| split_set_cookie(header.as_ref()))
        .filter_map(parse_cookie)
        .map(|cookie| (cookie.name.clone(), cookie))
        .collect()
}

/// Parse an `Expires` value in IMF-fixdate, the dashed Netscape form or
/// RFC 2822.
#[must_use]
pub fn parse_cookie_date(text: &str) -> Option<OffsetDateTime> {
    let text = text.trim();
    [IMF_FIXDATE, NETSCAPE_DATE]
        .into_iter()
        .find_map(|format| PrimitiveDateTime::parse(text, format).ok())
        .map(PrimitiveDateTime::assume_utc)
        .or_else(|| OffsetDateTime::parse(text, &Rfc2822).ok())
}
