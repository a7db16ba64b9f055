use jsonwebtoken::Algorithm;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_algorithm: Algorithm,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    pub s3_bucket: String,
    pub model_path: PathBuf,
    pub preprocess_config: Option<PathBuf>,
    pub max_upload_bytes: usize,
    pub presigned_url_ttl: Duration,
    pub stage_timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));

        let jwt_algorithm = match lookup("JWT_ALGORITHM") {
            Some(value) => parse_hmac_algorithm(&value)?,
            None => Algorithm::HS256,
        };

        let access_minutes: i64 = parse_positive("ACCESS_TOKEN_EXPIRE_MINUTES", &lookup, 30)?;
        let access_token_ttl = chrono::Duration::try_minutes(access_minutes)
            .ok_or_else(|| out_of_range("ACCESS_TOKEN_EXPIRE_MINUTES"))?;
        let refresh_days: i64 = parse_positive("REFRESH_TOKEN_EXPIRE_DAYS", &lookup, 30)?;
        let refresh_token_ttl = chrono::Duration::try_days(refresh_days)
            .ok_or_else(|| out_of_range("REFRESH_TOKEN_EXPIRE_DAYS"))?;
        let max_upload_mb: usize = parse_positive("MAX_UPLOAD_MB", &lookup, 10)?;
        let max_upload_bytes = max_upload_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| out_of_range("MAX_UPLOAD_MB"))?;
        let presign_secs: u64 = parse_positive("PRESIGNED_URL_TTL_SECS", &lookup, 3600)?;
        let stage_secs: u64 = parse_positive("PIPELINE_STAGE_TIMEOUT_SECS", &lookup, 60)?;

        let cors_origins = lookup("BACKEND_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["*".to_string()]);

        Ok(Self {
            port: parse_or("PORT", &lookup, 8081)?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_algorithm,
            access_token_ttl,
            refresh_token_ttl,
            s3_bucket: required("S3_BUCKET_NAME")?,
            model_path: PathBuf::from(required("MODEL_PATH")?),
            preprocess_config: lookup("PREPROCESS_CONFIG").map(PathBuf::from),
            max_upload_bytes,
            presigned_url_ttl: Duration::from_secs(presign_secs),
            stage_timeout: Duration::from_secs(stage_secs),
            cors_origins,
        })
    }
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

/// Like `parse_or`, but zero and negative values are rejected.
fn parse_positive<T, F>(key: &str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(key, lookup, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

fn out_of_range(key: &str) -> ConfigError {
    ConfigError::InvalidValue(key.to_string(), "value is out of range".to_string())
}

// Tokens are signed with a shared secret, so only the HMAC family applies.
fn parse_hmac_algorithm(value: &str) -> Result<Algorithm, ConfigError> {
    match Algorithm::from_str(value) {
        Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => Ok(alg),
        _ => Err(ConfigError::InvalidValue(
            "JWT_ALGORITHM".to_string(),
            format!("'{}' is not an HMAC algorithm", value),
        )),
    }
}
