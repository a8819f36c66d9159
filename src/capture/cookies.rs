//! Cookie serialisation for replaying a submitted session.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::db::Cookie;

/// `Cookie` request header value: `name=value` pairs joined with `;`.
#[must_use]
pub fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join(";")
}

/// Render cookies in the Netscape cookie file format understood by yt-dlp.
///
/// Cookies without a domain are scoped to the host of `url`.
#[must_use]
pub fn netscape_cookie_jar(cookies: &[Cookie], url: &str) -> String {
    let default_host = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();

    let mut jar = String::from("# Netscape HTTP Cookie File\n");
    for cookie in cookies {
        let domain = cookie
            .domain
            .clone()
            .unwrap_or_else(|| default_host.clone());
        let include_subdomains = if cookie.host_only == Some(true) {
            "FALSE"
        } else if domain.starts_with('.') || cookie.host_only == Some(false) {
            "TRUE"
        } else {
            "FALSE"
        };
        let prefix = if cookie.http_only == Some(true) {
            "#HttpOnly_"
        } else {
            ""
        };
        let path = cookie.path.as_deref().unwrap_or("/");
        let secure = if cookie.secure == Some(true) {
            "TRUE"
        } else {
            "FALSE"
        };
        let expires = match (cookie.session, cookie.expiration_date) {
            (Some(true), _) | (_, None) => 0,
            (_, Some(at)) => at.max(0.0) as u64,
        };

        let _ = writeln!(
            jar,
            "{prefix}{domain}\t{include_subdomains}\t{path}\t{secure}\t{expires}\t{}\t{}",
            cookie.name, cookie.value
        );
    }
    jar
}

/// Write the evidence's cookie jar to `dir/file_name` and return its path.
pub async fn write_cookie_jar(
    dir: &Path,
    file_name: &str,
    cookies: &[Cookie],
    url: &str,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create cookies directory {}", dir.display()))?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, netscape_cookie_jar(cookies, url))
        .await
        .with_context(|| format!("Failed to write cookie jar {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_header_order_and_separator() {
        let cookies = vec![Cookie::new("a", "1"), Cookie::new("b", "two")];
        assert_eq!(cookie_header(&cookies), "a=1;b=two");
        assert_eq!(cookie_header(&[]), "");
    }

    #[test]
    fn test_netscape_jar_lines() {
        let mut secure = Cookie::new("sid", "abc");
        secure.domain = Some(".example.com".to_string());
        secure.secure = Some(true);
        secure.http_only = Some(true);
        secure.expiration_date = Some(1_700_000_000.9);

        let plain = Cookie::new("lang", "en");

        let jar = netscape_cookie_jar(&[secure, plain], "https://www.example.com/page");
        let lines: Vec<&str> = jar.lines().collect();
        assert_eq!(lines[0], "# Netscape HTTP Cookie File");
        assert_eq!(
            lines[1],
            "#HttpOnly_.example.com\tTRUE\t/\tTRUE\t1700000000\tsid\tabc"
        );
        assert_eq!(lines[2], "www.example.com\tFALSE\t/\tFALSE\t0\tlang\ten");
    }

    #[tokio::test]
    async fn test_write_cookie_jar_creates_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let jar_dir = dir.path().join("cookies");
        let path = write_cookie_jar(&jar_dir, "e1.txt", &[Cookie::new("a", "1")], "http://h/")
            .await
            .unwrap();
        assert_eq!(path, jar_dir.join("e1.txt"));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.ends_with("h\tFALSE\t/\tFALSE\t0\ta\t1\n"));
    }
}
