use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use url::Url;

/// Validate that a string is a valid URL with http or https scheme
pub fn validate_url(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| anyhow!("Invalid URL format: {}", e))?;

    // Only allow http and https schemes
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(anyhow!(
            "URL must use http or https scheme, got: {}",
            url.scheme()
        ));
    }

    if url.host_str().is_none() {
        return Err(anyhow!("URL must have a host"));
    }

    Ok(url)
}

/// Validate a GitHub login: alphanumeric or hyphens, 1-39 chars
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > 39 {
        return Err(anyhow!(
            "Username must be between 1 and 39 characters"
        ));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(anyhow!(
            "Username can only contain alphanumeric characters and hyphens"
        ));
    }

    Ok(())
}

/// Validate that an LLM provider is supported
pub fn validate_provider(provider: &str) -> Result<()> {
    match provider {
        "openai" | "claude" | "deepseek" | "custom" => Ok(()),
        _ => Err(anyhow!(
            "Unsupported LLM provider '{}'. Supported: openai, claude, deepseek, custom",
            provider
        )),
    }
}

/// Parse a window boundary given either as RFC 3339 or as a plain
/// `YYYY-MM-DD` date. Plain dates resolve to the start of the day, or to
/// its last second when `end_of_day` is set.
pub fn parse_window_bound(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| anyhow!("Invalid date '{}', expected YYYY-MM-DD or RFC 3339", value))?;

    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };

    time.map(|t| t.and_utc())
        .ok_or_else(|| anyhow!("Invalid date '{}'", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://open.feishu.cn/open-apis/bot/v2/hook/x").is_ok());
        assert!(validate_url("http://localhost:3000").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not-a-url").is_err());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("octocat").is_ok());
        assert!(validate_username("my-user-123").is_ok());
        assert!(validate_username("my_user").is_err());
        assert!(validate_username("").is_err());
        assert!(validate_username(&"a".repeat(40)).is_err());
        assert!(validate_username("user@example").is_err());
        assert!(validate_username("../admin").is_err());
    }

    #[test]
    fn test_validate_provider() {
        assert!(validate_provider("openai").is_ok());
        assert!(validate_provider("claude").is_ok());
        assert!(validate_provider("deepseek").is_ok());
        assert!(validate_provider("custom").is_ok());
        assert!(validate_provider("bard").is_err());
    }

    #[test]
    fn test_parse_window_bound() {
        assert_eq!(
            parse_window_bound("2024-03-01", false).unwrap().to_rfc3339(),
            "2024-03-01T00:00:00+00:00"
        );
        assert_eq!(
            parse_window_bound("2024-03-01", true).unwrap().to_rfc3339(),
            "2024-03-01T23:59:59+00:00"
        );
        assert_eq!(
            parse_window_bound("2024-03-01T08:00:00+08:00", false).unwrap().to_rfc3339(),
            "2024-03-01T00:00:00+00:00"
        );
        assert!(parse_window_bound("03/01/2024", false).is_err());
    }
}
