//! Per-user cookie storage.
//!
//! Users upload browser cookies (Netscape `cookies.txt` or a JSON export) so the
//! engine can fetch login-gated content. Payloads are normalized to Netscape
//! format, encrypted with ChaCha20-Poly1305 and stored per (user, platform).
//! At download time the cookie is decrypted into a short-lived file that the
//! pipeline deletes afterwards.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::validation::Platform;
use crate::storage::db::{format_timestamp, parse_timestamp, DbConnection};

const NONCE_LEN: usize = 12;
const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";

/// Authenticated encryption for stored cookies.
///
/// Ciphertext layout: `base64(nonce || ciphertext+tag)`, with a fresh random
/// 96-bit nonce per message.
pub struct CookieCipher {
    cipher: ChaCha20Poly1305,
}

impl CookieCipher {
    /// Builds a cipher from a base64-encoded 32-byte key.
    pub fn from_base64(key: &str) -> AppResult<Self> {
        let bytes = BASE64
            .decode(key.trim())
            .map_err(|e| AppError::Config(format!("ENCRYPTION_KEY is not valid base64: {}", e)))?;
        let cipher = ChaCha20Poly1305::new_from_slice(&bytes)
            .map_err(|_| AppError::Config(format!("ENCRYPTION_KEY must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self { cipher })
    }

    /// A cipher with a random key; stored cookies become unreadable after restart.
    pub fn generate() -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        Self {
            cipher: ChaCha20Poly1305::new(&key),
        }
    }

    /// Cipher for `ENCRYPTION_KEY`, or a process-lifetime random key when unset or invalid.
    pub fn from_config() -> Self {
        match config::cookies::ENCRYPTION_KEY.as_deref() {
            Some(key) => match Self::from_base64(key) {
                Ok(cipher) => cipher,
                Err(e) => {
                    log::error!("{}; falling back to a temporary key", e);
                    Self::generate()
                }
            },
            None => {
                log::warn!("ENCRYPTION_KEY is not set; stored cookies will not survive a restart");
                Self::generate()
            }
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Crypto("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> AppResult<String> {
        let data = BASE64
            .decode(encoded)
            .map_err(|e| AppError::Crypto(format!("payload is not base64: {}", e)))?;
        if data.len() <= NONCE_LEN {
            return Err(AppError::Crypto("payload too short".to_string()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Crypto("decryption failed (wrong key or corrupted data)".to_string()))?;
        String::from_utf8(plaintext).map_err(|_| AppError::Crypto("decrypted payload is not UTF-8".to_string()))
    }
}

static CIPHER: Lazy<CookieCipher> = Lazy::new(CookieCipher::from_config);

/// The process-wide cipher built from configuration.
pub fn cookie_cipher() -> &'static CookieCipher {
    &CIPHER
}

// ==================== Content parsing ====================

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieFormat {
    Netscape,
    Json,
}

/// One cookie in a browser JSON export (EditThisCookie / Cookie-Editor layout).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonCookie {
    domain: String,
    name: String,
    #[serde(default)]
    value: String,
    #[serde(default = "default_path")]
    path: String,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    expiration_date: Option<f64>,
    #[serde(default)]
    host_only: Option<bool>,
}

fn default_path() -> String {
    "/".to_string()
}

/// Splits a Netscape data line into its seven fields.
///
/// `#HttpOnly_` prefixed lines are data lines; other `#` lines are comments.
fn netscape_fields(line: &str) -> Option<Vec<&str>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let line = match line.strip_prefix("#HttpOnly_") {
        Some(rest) => rest,
        None if line.starts_with('#') || line.trim().is_empty() => return None,
        None => line,
    };
    let fields: Vec<&str> = line.split('\t').collect();
    (fields.len() == 7).then_some(fields)
}

/// Checks that `content` is a usable cookie file and reports its format.
pub fn validate_cookie_content(content: &str) -> AppResult<CookieFormat> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Err(AppError::Validation("cookie file is empty".to_string()));
    }

    if trimmed.starts_with('[') {
        let cookies: Vec<JsonCookie> = serde_json::from_str(trimmed)
            .map_err(|e| AppError::Validation(format!("invalid JSON cookie export: {}", e)))?;
        if cookies.is_empty() {
            return Err(AppError::Validation("JSON cookie export has no cookies".to_string()));
        }
        return Ok(CookieFormat::Json);
    }

    let has_header = trimmed
        .lines()
        .next()
        .is_some_and(|l| l.starts_with(NETSCAPE_HEADER) || l.starts_with("# HTTP Cookie File"));
    let data_lines = content.lines().filter_map(netscape_fields).count();

    if data_lines == 0 {
        return Err(AppError::Validation(
            "no tab-separated cookie lines found (expected Netscape cookies.txt)".to_string(),
        ));
    }
    if !has_header {
        log::debug!("Cookie upload has no Netscape header but {} valid lines", data_lines);
    }
    Ok(CookieFormat::Netscape)
}

/// Converts either accepted format into Netscape `cookies.txt` text.
pub fn to_netscape(content: &str) -> AppResult<String> {
    match validate_cookie_content(content)? {
        CookieFormat::Netscape => {
            if content.trim_start().starts_with(NETSCAPE_HEADER) {
                Ok(content.to_string())
            } else {
                Ok(format!("{}\n{}", NETSCAPE_HEADER, content))
            }
        }
        CookieFormat::Json => {
            let cookies: Vec<JsonCookie> = serde_json::from_str(content.trim())?;
            let mut out = String::from(NETSCAPE_HEADER);
            out.push('\n');
            for c in cookies {
                let include_subdomains = !c.host_only.unwrap_or(!c.domain.starts_with('.'));
                let expires = c.expiration_date.map(|e| e.max(0.0) as i64).unwrap_or(0);
                out.push_str(&format!(
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                    c.domain,
                    if include_subdomains { "TRUE" } else { "FALSE" },
                    c.path,
                    if c.secure { "TRUE" } else { "FALSE" },
                    expires,
                    c.name,
                    c.value
                ));
            }
            Ok(out)
        }
    }
}

/// Domains of all cookie lines in a Netscape file, lowercased and without the leading dot.
pub fn cookie_domains(netscape: &str) -> Vec<String> {
    netscape
        .lines()
        .filter_map(netscape_fields)
        .map(|f| f[0].trim_start_matches('.').to_lowercase())
        .collect()
}

fn domain_matches(domain: &str, platform_domain: &str) -> bool {
    domain == platform_domain || domain.ends_with(&format!(".{}", platform_domain))
}

/// The platform most of the cookies belong to.
pub fn detect_cookie_platform(netscape: &str) -> Option<Platform> {
    let domains = cookie_domains(netscape);
    Platform::all()
        .iter()
        .map(|p| {
            let hits = domains
                .iter()
                .filter(|d| p.cookie_domains().iter().any(|pd| domain_matches(d, pd)))
                .count();
            (*p, hits)
        })
        .filter(|(_, hits)| *hits > 0)
        .max_by_key(|(_, hits)| *hits)
        .map(|(p, _)| p)
}

/// Latest expiry among persistent cookies; `None` when all are session cookies.
pub fn latest_expiry(netscape: &str) -> Option<DateTime<Utc>> {
    netscape
        .lines()
        .filter_map(netscape_fields)
        .filter_map(|f| f[4].trim().parse::<i64>().ok())
        .filter(|ts| *ts > 0)
        .max()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
}

// ==================== Store ====================

/// Metadata of a stored cookie; the payload itself is never listed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCookie {
    pub platform: String,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_valid: bool,
}

/// Encrypts and stores `netscape` for (user, platform), replacing any previous entry.
pub fn save_cookie(
    conn: &mut DbConnection,
    cipher: &CookieCipher,
    user_id: i64,
    platform: Platform,
    netscape: &str,
) -> AppResult<()> {
    let encrypted = cipher.encrypt(netscape)?;
    let expires_at = latest_expiry(netscape).map(format_timestamp);

    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM cookies WHERE user_id = ?1 AND platform = ?2",
        params![user_id, platform.as_str()],
    )?;
    tx.execute(
        "INSERT INTO cookies (user_id, platform, cookie_data, expires_at, is_valid)
         VALUES (?1, ?2, ?3, ?4, 1)",
        params![user_id, platform.as_str(), encrypted, expires_at],
    )?;
    tx.commit()?;

    log::info!("Stored {} cookies for user {}", platform, user_id);
    Ok(())
}

/// Decrypted cookie for (user, platform) if one is valid and unexpired.
pub fn get_cookie(
    conn: &DbConnection,
    cipher: &CookieCipher,
    user_id: i64,
    platform: Platform,
) -> AppResult<Option<String>> {
    let now = format_timestamp(Utc::now());
    let encrypted: Option<String> = conn
        .query_row(
            "SELECT cookie_data FROM cookies
             WHERE user_id = ?1 AND platform = ?2 AND is_valid = 1
               AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY id DESC LIMIT 1",
            params![user_id, platform.as_str(), now],
            |row| row.get(0),
        )
        .optional()?;

    encrypted.map(|data| cipher.decrypt(&data)).transpose()
}

pub fn list_cookies(conn: &DbConnection, user_id: i64) -> AppResult<Vec<StoredCookie>> {
    let mut stmt = conn.prepare(
        "SELECT platform, created_at, expires_at, is_valid FROM cookies
         WHERE user_id = ?1 ORDER BY platform",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        let created: Option<String> = row.get(1)?;
        let expires: Option<String> = row.get(2)?;
        Ok(StoredCookie {
            platform: row.get(0)?,
            created_at: created.as_deref().and_then(parse_timestamp),
            expires_at: expires.as_deref().and_then(parse_timestamp),
            is_valid: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Deletes the cookie for (user, platform); returns whether one existed.
pub fn delete_cookie(conn: &DbConnection, user_id: i64, platform: Platform) -> AppResult<bool> {
    let deleted = conn.execute(
        "DELETE FROM cookies WHERE user_id = ?1 AND platform = ?2",
        params![user_id, platform.as_str()],
    )?;
    Ok(deleted > 0)
}

/// Marks a cookie unusable after the platform rejected it.
pub fn invalidate_cookie(conn: &DbConnection, user_id: i64, platform: Platform) -> AppResult<()> {
    conn.execute(
        "UPDATE cookies SET is_valid = 0 WHERE user_id = ?1 AND platform = ?2",
        params![user_id, platform.as_str()],
    )?;
    log::info!("Invalidated {} cookies for user {}", platform, user_id);
    Ok(())
}

/// Writes a decrypted cookie to `<dir>/<task_id>.cookies.txt` for one engine call.
pub fn write_cookie_file(dir: &Path, task_id: &str, netscape: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.cookies.txt", task_id));
    std::fs::write(&path, netscape)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db;
    use pretty_assertions::assert_eq;

    const NETSCAPE: &str = "# Netscape HTTP Cookie File\n\
        .youtube.com\tTRUE\t/\tTRUE\t1999999999\tSID\tabc\n\
        #HttpOnly_.youtube.com\tTRUE\t/\tTRUE\t0\tHSID\tdef\n\
        .google.com\tTRUE\t/\tTRUE\t1899999999\tNID\tghi\n";

    fn pool() -> (tempfile::TempDir, db::DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::create_pool(dir.path().join("c.sqlite").to_str().unwrap()).unwrap();
        (dir, pool)
    }

    #[test]
    fn cipher_round_trip_uses_fresh_nonces() {
        let cipher = CookieCipher::generate();
        let a = cipher.encrypt("secret").unwrap();
        let b = cipher.encrypt("secret").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), "secret");
    }

    #[test]
    fn wrong_key_and_tampering_are_rejected() {
        let cipher = CookieCipher::generate();
        let other = CookieCipher::generate();
        let sealed = cipher.encrypt("secret").unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(AppError::Crypto(_))));

        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(cipher.decrypt(&BASE64.encode(raw)).is_err());
        assert!(cipher.decrypt("AAAA").is_err());
    }

    #[test]
    fn key_must_be_32_bytes() {
        assert!(CookieCipher::from_base64(&BASE64.encode([7u8; 32])).is_ok());
        assert!(matches!(
            CookieCipher::from_base64(&BASE64.encode([7u8; 16])),
            Err(AppError::Config(_))
        ));
        assert!(CookieCipher::from_base64("not base64!").is_err());
    }

    #[test]
    fn validates_formats() {
        assert_eq!(validate_cookie_content(NETSCAPE).unwrap(), CookieFormat::Netscape);
        assert_eq!(
            validate_cookie_content(r#"[{"domain":".tiktok.com","name":"sid","value":"1"}]"#).unwrap(),
            CookieFormat::Json
        );
        assert!(validate_cookie_content("").is_err());
        assert!(validate_cookie_content("hello world").is_err());
        assert!(validate_cookie_content("[]").is_err());
        assert!(validate_cookie_content("[{\"foo\": 1}]").is_err());
    }

    #[test]
    fn json_export_converts_to_netscape() {
        let json = r#"[
            {"domain":".instagram.com","name":"sessionid","value":"s1","secure":true,"expirationDate":1900000000.5},
            {"domain":"www.instagram.com","name":"csrftoken","value":"t","hostOnly":true}
        ]"#;
        let netscape = to_netscape(json).unwrap();
        let lines: Vec<&str> = netscape.lines().collect();
        assert_eq!(lines[0], NETSCAPE_HEADER);
        assert_eq!(lines[1], ".instagram.com\tTRUE\t/\tTRUE\t1900000000\tsessionid\ts1");
        assert_eq!(lines[2], "www.instagram.com\tFALSE\t/\tFALSE\t0\tcsrftoken\tt");
        assert_eq!(detect_cookie_platform(&netscape), Some(Platform::Instagram));
    }

    #[test]
    fn detects_platform_and_expiry() {
        assert_eq!(detect_cookie_platform(NETSCAPE), Some(Platform::Youtube));
        assert_eq!(detect_cookie_platform("# Netscape HTTP Cookie File\n"), None);
        assert_eq!(
            detect_cookie_platform("x.com\tFALSE\t/\tTRUE\t0\tauth\t1\n"),
            Some(Platform::Twitter)
        );
        assert_eq!(latest_expiry(NETSCAPE).map(|d| d.timestamp()), Some(1_999_999_999));
        assert_eq!(cookie_domains(NETSCAPE), vec!["youtube.com", "youtube.com", "google.com"]);
    }

    #[test]
    fn store_replaces_and_filters_invalid() {
        let (_dir, pool) = pool();
        let mut conn = db::get_connection(&pool).unwrap();
        let cipher = CookieCipher::generate();

        save_cookie(&mut conn, &cipher, 7, Platform::Youtube, "old").unwrap();
        save_cookie(&mut conn, &cipher, 7, Platform::Youtube, NETSCAPE).unwrap();
        assert_eq!(get_cookie(&conn, &cipher, 7, Platform::Youtube).unwrap().as_deref(), Some(NETSCAPE));
        assert_eq!(get_cookie(&conn, &cipher, 8, Platform::Youtube).unwrap(), None);

        let stored: String = conn
            .query_row("SELECT cookie_data FROM cookies WHERE user_id = 7", [], |r| r.get(0))
            .unwrap();
        assert!(!stored.contains("SID"));

        let listed = list_cookies(&conn, 7).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].platform, "youtube");
        assert!(listed[0].is_valid);

        invalidate_cookie(&conn, 7, Platform::Youtube).unwrap();
        assert_eq!(get_cookie(&conn, &cipher, 7, Platform::Youtube).unwrap(), None);

        assert!(delete_cookie(&conn, 7, Platform::Youtube).unwrap());
        assert!(!delete_cookie(&conn, 7, Platform::Youtube).unwrap());
        assert!(list_cookies(&conn, 7).unwrap().is_empty());
    }

    #[test]
    fn expired_cookies_are_not_returned() {
        let (_dir, pool) = pool();
        let mut conn = db::get_connection(&pool).unwrap();
        let cipher = CookieCipher::generate();
        let expired = ".vimeo.com\tTRUE\t/\tTRUE\t1000000000\tvuid\t1\n";

        save_cookie(&mut conn, &cipher, 1, Platform::Vimeo, expired).unwrap();
        assert_eq!(get_cookie(&conn, &cipher, 1, Platform::Vimeo).unwrap(), None);
    }

    #[test]
    fn cookie_file_is_written_privately() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cookie_file(dir.path(), "abc", NETSCAPE).unwrap();
        assert_eq!(path, dir.path().join("abc.cookies.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), NETSCAPE);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
