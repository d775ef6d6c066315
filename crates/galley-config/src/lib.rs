//! Environment configuration and the project clock.
//!
//! All required variables are validated at startup; a missing or malformed
//! one fails the process before any pool or client is built. URL-typed
//! variables must parse. Secret-looking values are masked before they can
//! reach a log line — `redact_url` is the only way a raw upstream URL is
//! allowed to leave this crate.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

pub mod clock;
pub mod redact;

pub use clock::ProjectClock;
pub use redact::{mask_secret, redact_url};

pub const ENV_DB_URL: &str = "GALLEY_DATABASE_URL";
pub const ENV_POS_URL: &str = "GALLEY_POS_URL";
pub const ENV_POS_LOGIN: &str = "GALLEY_POS_LOGIN";
pub const ENV_POS_PASSWORD: &str = "GALLEY_POS_PASSWORD";
pub const ENV_FIN_URL: &str = "GALLEY_FIN_URL";
pub const ENV_FIN_TOKEN: &str = "GALLEY_FIN_TOKEN";
pub const ENV_CLOUD_URL: &str = "GALLEY_CLOUD_URL";
pub const ENV_WEBHOOK_SECRET: &str = "GALLEY_WEBHOOK_SECRET";
pub const ENV_SHEET_ID: &str = "GALLEY_SHEET_ID";
pub const ENV_TZ: &str = "GALLEY_TZ";
pub const ENV_CACHE_URL: &str = "GALLEY_CACHE_URL";
pub const ENV_BIND_ADDR: &str = "GALLEY_BIND_ADDR";
pub const ENV_LEGACY_ADMIN_TABLES: &str = "GALLEY_LEGACY_ADMIN_TABLES";
pub const ENV_CONSUMABLES_GROUP: &str = "GALLEY_CONSUMABLES_GROUP";
pub const ENV_TRANSFER_SOURCE_PREFIX: &str = "GALLEY_TRANSFER_SOURCE_PREFIX";
pub const ENV_TRANSFER_TARGET_PREFIXES: &str = "GALLEY_TRANSFER_TARGET_PREFIXES";

/// Fully validated process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub pos_url: reqwest::Url,
    pub pos_login: String,
    pub pos_password: String,
    pub fin_url: reqwest::Url,
    pub fin_token: String,
    pub cloud_url: reqwest::Url,
    pub webhook_secret: String,
    pub sheet_id: String,
    pub clock: ProjectClock,
    /// Shared cache backend; `None` means in-process maps.
    pub cache_url: Option<String>,
    pub bind_addr: String,
    /// Open-question flag: read admin/receiver sets from the legacy DB
    /// tables instead of the spreadsheet matrix.
    pub legacy_admin_tables: bool,
    /// Top-parent product group considered in the nightly transfer.
    pub consumables_group: String,
    /// Store-name prefix of transfer sources, e.g. "Хоз. товары".
    pub transfer_source_prefix: String,
    /// Store-name prefixes of transfer targets, e.g. ["Бар", "Кухня"].
    pub transfer_target_prefixes: Vec<String>,
}

impl Config {
    /// Read and validate every variable. Fails fast on the first problem.
    pub fn from_env() -> Result<Self> {
        let database_url = required(ENV_DB_URL)?;
        let pos_url = required_url(ENV_POS_URL)?;
        let pos_login = required(ENV_POS_LOGIN)?;
        let pos_password = required(ENV_POS_PASSWORD)?;
        let fin_url = required_url(ENV_FIN_URL)?;
        let fin_token = required(ENV_FIN_TOKEN)?;
        let cloud_url = required_url(ENV_CLOUD_URL)?;
        let webhook_secret = required(ENV_WEBHOOK_SECRET)?;
        let sheet_id = required(ENV_SHEET_ID)?;

        let tz_name =
            std::env::var(ENV_TZ).unwrap_or_else(|_| "Europe/Kaliningrad".to_string());
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| anyhow!("{} is not a valid timezone: {}", ENV_TZ, tz_name))?;

        let cache_url = std::env::var(ENV_CACHE_URL).ok().filter(|s| !s.is_empty());

        let bind_addr =
            std::env::var(ENV_BIND_ADDR).unwrap_or_else(|_| "127.0.0.1:8099".to_string());

        let legacy_admin_tables = flag(ENV_LEGACY_ADMIN_TABLES);

        let consumables_group = std::env::var(ENV_CONSUMABLES_GROUP)
            .unwrap_or_else(|_| "Расходные материалы".to_string());
        let transfer_source_prefix = std::env::var(ENV_TRANSFER_SOURCE_PREFIX)
            .unwrap_or_else(|_| "Хоз. товары".to_string());
        let transfer_target_prefixes: Vec<String> = std::env::var(ENV_TRANSFER_TARGET_PREFIXES)
            .unwrap_or_else(|_| "Бар,Кухня".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if transfer_target_prefixes.is_empty() {
            return Err(anyhow!(
                "{} must name at least one target prefix",
                ENV_TRANSFER_TARGET_PREFIXES
            ));
        }

        Ok(Self {
            database_url,
            pos_url,
            pos_login,
            pos_password,
            fin_url,
            fin_token,
            cloud_url,
            webhook_secret,
            sheet_id,
            clock: ProjectClock::new(tz),
            cache_url,
            bind_addr,
            legacy_admin_tables,
            consumables_group,
            transfer_source_prefix,
            transfer_target_prefixes,
        })
    }
}

fn required(name: &str) -> Result<String> {
    let v = std::env::var(name).with_context(|| format!("missing env var {name}"))?;
    if v.trim().is_empty() {
        return Err(anyhow!("env var {name} is set but empty"));
    }
    Ok(v)
}

fn required_url(name: &str) -> Result<reqwest::Url> {
    let raw = required(name)?;
    raw.parse::<reqwest::Url>()
        .with_context(|| format!("env var {name} is not a valid URL"))
}

fn flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Convert a project-zone date to the UTC instant of its midnight.
pub fn local_midnight_utc(tz: Tz, date: NaiveDate) -> Result<DateTime<Utc>> {
    let local = tz
        .from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight"))
        .single()
        .ok_or_else(|| anyhow!("ambiguous midnight for {}", date))?;
    Ok(local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parses_truthy_forms() {
        std::env::set_var("GALLEY_TEST_FLAG_A", "1");
        std::env::set_var("GALLEY_TEST_FLAG_B", "TRUE");
        std::env::set_var("GALLEY_TEST_FLAG_C", "0");
        assert!(flag("GALLEY_TEST_FLAG_A"));
        assert!(flag("GALLEY_TEST_FLAG_B"));
        assert!(!flag("GALLEY_TEST_FLAG_C"));
        assert!(!flag("GALLEY_TEST_FLAG_ABSENT"));
    }

    #[test]
    fn required_rejects_empty() {
        std::env::set_var("GALLEY_TEST_EMPTY", "   ");
        assert!(required("GALLEY_TEST_EMPTY").is_err());
    }
}
