use aws_sdk_dynamodb as dynamo_db;
use aws_sdk_s3 as s3;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DESTINATION_PREFIX: &str = "DESTINATION_PREFIX";
pub const TARGET_WIDTH: &str = "TARGET_WIDTH";
pub const TABLE_NAME: &str = "DYNAMODB_TABLE_NAME";
pub const SCRATCH_DIR: &str = "SCRATCH_DIR";
pub const FAILURE_POLICY: &str = "FAILURE_POLICY";

const DEFAULT_SCRATCH_DIR: &str = "/tmp";

/// Process-wide settings, resolved once during the cold start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Key prefix processed images are published under, inside the source bucket.
    pub destination_prefix: String,

    pub transform: TransformParameters,

    /// DynamoDB table receiving one run record per processed image.
    pub table_name: String,

    /// Where objects are downloaded to and resized in. Lambda only offers `/tmp`.
    pub scratch_dir: PathBuf,

    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParameters {
    pub target_width: u32,
}

/// What a failing notification does to the rest of the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Fail the whole invocation so the queue redrives every message in it.
    #[default]
    AbortBatch,
    /// Keep going and hand the ids of failed messages back to the queue.
    ReportItemFailures,
}

impl FailurePolicy {
    /// Deployment requirement the policy silently depends on, if any.
    pub fn requirement(&self) -> Option<&'static str> {
        match self {
            FailurePolicy::AbortBatch => None,
            // Without it SQS ignores the returned ids and deletes the whole batch.
            FailurePolicy::ReportItemFailures => Some(
                "report-item-failures needs ReportBatchItemFailures enabled on the SQS \
                 event source mapping, otherwise failed messages are deleted as successful",
            ),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "abort-batch" => Ok(FailurePolicy::AbortBatch),
            "report-item-failures" => Ok(FailurePolicy::ReportItemFailures),
            other => Err(format!(
                "unknown policy '{}', expected 'abort-batch' or 'report-item-failures'",
                other
            )),
        }
    }
}

/// Every problem found in the environment, so one cold start reports all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub missing: Vec<String>,
    pub invalid: Vec<String>,
}

impl ConfigError {
    pub fn new(missing: Vec<String>, invalid: Vec<String>) -> Self {
        ConfigError { missing, invalid }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![];

        if !self.missing.is_empty() {
            parts.push(format!(
                "Missing environment variables: {}",
                self.missing.join(", ")
            ));
        }
        if !self.invalid.is_empty() {
            parts.push(format!(
                "Invalid environment variables: {}",
                self.invalid.join(", ")
            ));
        }

        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    /// Resolves the configuration from any variable source. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut missing = vec![];
        let mut invalid = vec![];

        let table_name = read(TABLE_NAME);
        if table_name.is_none() {
            missing.push(TABLE_NAME.to_string());
        }

        let destination_prefix = read(DESTINATION_PREFIX);
        if destination_prefix.is_none() {
            missing.push(DESTINATION_PREFIX.to_string());
        }

        let target_width = match read(TARGET_WIDTH) {
            None => {
                missing.push(TARGET_WIDTH.to_string());
                None
            }
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(width) if width > 0 => Some(width),
                _ => {
                    invalid.push(format!(
                        "{} ('{}' is not a positive integer)",
                        TARGET_WIDTH, raw
                    ));
                    None
                }
            },
        };

        let failure_policy = match read(FAILURE_POLICY) {
            None => FailurePolicy::default(),
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                invalid.push(format!("{} ({})", FAILURE_POLICY, e));
                FailurePolicy::default()
            }),
        };

        let scratch_dir = read(SCRATCH_DIR).unwrap_or_else(|| DEFAULT_SCRATCH_DIR.to_string());

        match (destination_prefix, target_width, table_name) {
            (Some(destination_prefix), Some(target_width), Some(table_name))
                if invalid.is_empty() =>
            {
                let config = Config {
                    destination_prefix,
                    transform: TransformParameters { target_width },
                    table_name,
                    scratch_dir: PathBuf::from(scratch_dir),
                    failure_policy,
                };
                tracing::event!(tracing::Level::DEBUG, "{:?}", config);
                if let Some(requirement) = config.failure_policy.requirement() {
                    tracing::warn!("{}", requirement);
                }

                Ok(config)
            }
            _ => Err(ConfigError::new(missing, invalid)),
        }
    }
}

/// Both clients share one credential chain, so the SDK config is loaded once.
pub async fn get_clients() -> (s3::Client, dynamo_db::Client) {
    let cfg = aws_config::load_from_env().await;

    (s3::Client::new(&cfg), dynamo_db::Client::new(&cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |name| vars.get(name).cloned()
    }

    #[test]
    fn resolves_all_options() {
        let cfg = Config::from_lookup(lookup(&[
            (DESTINATION_PREFIX, "processed/"),
            (TARGET_WIDTH, "800"),
            (TABLE_NAME, "image-runs"),
        ]))
        .unwrap();

        assert_eq!(cfg.destination_prefix, "processed/");
        assert_eq!(cfg.transform.target_width, 800);
        assert_eq!(cfg.table_name, "image-runs");
        assert_eq!(cfg.scratch_dir, PathBuf::from("/tmp"));
        assert_eq!(cfg.failure_policy, FailurePolicy::AbortBatch);
    }

    #[test]
    fn names_every_missing_option() {
        let err =
            Config::from_lookup(lookup(&[(DESTINATION_PREFIX, "processed/")])).unwrap_err();

        assert_eq!(
            err.missing,
            vec![TABLE_NAME.to_string(), TARGET_WIDTH.to_string()]
        );
        let msg = err.to_string();
        assert!(msg.contains("TARGET_WIDTH"));
        assert!(msg.contains("DYNAMODB_TABLE_NAME"));
    }

    #[test]
    fn empty_values_count_as_missing() {
        let err = Config::from_lookup(lookup(&[
            (DESTINATION_PREFIX, ""),
            (TARGET_WIDTH, "800"),
            (TABLE_NAME, "image-runs"),
        ]))
        .unwrap_err();

        assert_eq!(err.missing, vec![DESTINATION_PREFIX.to_string()]);
    }

    #[test]
    fn rejects_non_positive_width() {
        for raw in ["0", "-5", "wide"] {
            let err = Config::from_lookup(lookup(&[
                (DESTINATION_PREFIX, "processed/"),
                (TARGET_WIDTH, raw),
                (TABLE_NAME, "image-runs"),
            ]))
            .unwrap_err();

            assert!(err.missing.is_empty());
            assert_eq!(err.invalid.len(), 1);
            assert!(err.to_string().contains(raw));
        }
    }

    #[test]
    fn reports_missing_and_invalid_together() {
        let err = Config::from_lookup(lookup(&[
            (TARGET_WIDTH, "800"),
            (FAILURE_POLICY, "retry-forever"),
        ]))
        .unwrap_err();

        assert_eq!(err.missing.len(), 2);
        assert_eq!(err.invalid.len(), 1);
        assert!(err.to_string().contains("retry-forever"));
    }

    #[test]
    fn reads_optional_settings() {
        let cfg = Config::from_lookup(lookup(&[
            (DESTINATION_PREFIX, "processed"),
            (TARGET_WIDTH, " 320 "),
            (TABLE_NAME, "image-runs"),
            (SCRATCH_DIR, "/var/scratch"),
            (FAILURE_POLICY, "report-item-failures"),
        ]))
        .unwrap();

        assert_eq!(cfg.transform.target_width, 320);
        assert_eq!(cfg.scratch_dir, PathBuf::from("/var/scratch"));
        assert_eq!(cfg.failure_policy, FailurePolicy::ReportItemFailures);
    }

    #[test]
    fn item_failures_name_the_mapping_setting() {
        assert_eq!(FailurePolicy::AbortBatch.requirement(), None);

        let requirement = FailurePolicy::ReportItemFailures.requirement().unwrap();
        assert!(requirement.contains("ReportBatchItemFailures"));
    }
}
