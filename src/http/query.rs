//! Query-string encoding.

use indexmap::IndexMap;
use itertools::Itertools;

use super::HeaderValue;

/// Encode `params` as `key=value` pairs joined by `&`.
///
/// Values are percent-encoded; list values become repeated `key[]=` pairs.
///
/// # Examples
/// ```
/// use indexmap::IndexMap;
/// use qel::http::{HeaderValue, encode_query};
///
/// let mut params = IndexMap::new();
/// params.insert("a".to_owned(), HeaderValue::from("1 2"));
/// params.insert("b".to_owned(), HeaderValue::from(["x", "y"]));
/// assert_eq!(encode_query(&params), "a=1%202&b[]=x&b[]=y");
/// ```
#[must_use]
pub fn encode_query(params: &IndexMap<String, HeaderValue>) -> String {
    params
        .iter()
        .flat_map(|(key, value)| {
            let name = match value {
                HeaderValue::Single(_) => key.clone(),
                HeaderValue::Multiple(_) => format!("{key}[]"),
            };
            value
                .values()
                .iter()
                .map(move |item| format!("{name}={}", urlencoding::encode(item)))
        })
        .join("&")
}

/// Append encoded `params` to `url`, preserving any existing query string and
/// fragment.
///
/// # Examples
/// ```
/// use indexmap::IndexMap;
/// use qel::http::{HeaderValue, append_query};
///
/// let mut params = IndexMap::new();
/// params.insert("q".to_owned(), HeaderValue::from("rust"));
/// assert_eq!(append_query("https://x.test/s?lang=en", &params), "https://x.test/s?lang=en&q=rust");
/// assert_eq!(append_query("https://x.test/s#top", &params), "https://x.test/s?q=rust#top");
/// ```
#[must_use]
pub fn append_query(url: &str, params: &IndexMap<String, HeaderValue>) -> String {
    let encoded = encode_query(params);
    if encoded.is_empty() {
        return url.to_owned();
    }
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if !base.contains('?') {
        "?"
    } else if base.ends_with('?') || base.ends_with('&') {
        ""
    } else {
        "&"
    };
    let mut out = format!("{base}{separator}{encoded}");
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn params(pairs: &[(&str, HeaderValue)]) -> IndexMap<String, HeaderValue> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), value.clone()))
            .collect()
    }

    #[rstest]
    #[case("http://x/", "http://x/?k=v")]
    #[case("http://x/?", "http://x/?k=v")]
    #[case("http://x/?a=1", "http://x/?a=1&k=v")]
    #[case("http://x/?a=1&", "http://x/?a=1&k=v")]
    fn appends_with_the_right_separator(#[case] url: &str, #[case] expected: &str) {
        let query = params(&[("k", HeaderValue::from("v"))]);
        assert_eq!(append_query(url, &query), expected);
    }

    #[test]
    fn empty_params_leave_url_untouched() {
        assert_eq!(append_query("http://x/?a=1", &IndexMap::new()), "http://x/?a=1");
    }

    #[test]
    fn reserved_characters_are_encoded() {
        let query = params(&[("q", HeaderValue::from("a&b=c/d"))]);
        assert_eq!(encode_query(&query), "q=a%26b%3Dc%2Fd");
    }
}
