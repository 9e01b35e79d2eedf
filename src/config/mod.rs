use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub text: TextConfig,
    pub ipset: IpSetConfig,
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextConfig {
    /// Text from this prefix to the end of a line is ignored.
    /// Empty disables comment stripping.
    pub comment_prefix: String,
    pub max_line_length: usize,
    pub delimiter: char,
    pub bad_lines: BadLinePolicy,
    /// Copy rejected input lines to stderr.
    pub echo_bad_lines: bool,
}

/// What a text builder does with a line it cannot parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadLinePolicy {
    Abort,
    #[default]
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpSetConfig {
    /// Promote IPv4 sets to IPv6 when an IPv6 address is inserted.
    pub auto_convert: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            comment_prefix: TextConfig::DEFAULT_COMMENT_PREFIX.to_string(),
            max_line_length: TextConfig::DEFAULT_MAX_LINE_LENGTH,
            delimiter: TextConfig::DEFAULT_DELIMITER,
            bad_lines: BadLinePolicy::default(),
            echo_bad_lines: false,
        }
    }
}

impl TextConfig {
    const DEFAULT_COMMENT_PREFIX: &'static str = "#";
    const DEFAULT_MAX_LINE_LENGTH: usize = 2048;
    const DEFAULT_DELIMITER: char = '|';
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_source(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let comment_prefix = var("FLOWAGG_COMMENT_PREFIX")
            .unwrap_or_else(|| TextConfig::DEFAULT_COMMENT_PREFIX.to_string());

        let max_line_length = var("FLOWAGG_MAX_LINE_LENGTH")
            .unwrap_or_else(|| TextConfig::DEFAULT_MAX_LINE_LENGTH.to_string())
            .parse::<usize>()?;

        let delimiter_str =
            var("FLOWAGG_DELIMITER").unwrap_or_else(|| TextConfig::DEFAULT_DELIMITER.to_string());
        let mut chars = delimiter_str.chars();
        let delimiter = match (chars.next(), chars.next()) {
            (Some(c), None) if c != '\n' => c,
            _ => {
                tracing::warn!(
                    "FLOWAGG_DELIMITER '{delimiter_str}' is not a single character, falling back to '|'"
                );
                TextConfig::DEFAULT_DELIMITER
            }
        };

        let bad_lines = match var("FLOWAGG_BAD_LINES")
            .unwrap_or_else(|| "skip".to_string())
            .to_lowercase()
            .as_str()
        {
            "skip" => BadLinePolicy::Skip,
            "abort" => BadLinePolicy::Abort,
            other => {
                tracing::warn!(
                    "Unknown FLOWAGG_BAD_LINES '{other}', falling back to 'skip'. Supported values: abort, skip"
                );
                BadLinePolicy::Skip
            }
        };

        let echo_bad_lines = var("FLOWAGG_ECHO_BAD_LINES")
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        let auto_convert = var("FLOWAGG_IPSET_AUTO_CONVERT")
            .map(|v| is_truthy(&v))
            .unwrap_or(true);

        let seed = var("FLOWAGG_SAMPLE_SEED")
            .map(|v| v.parse::<u64>())
            .transpose()?;

        Ok(Config {
            text: TextConfig {
                comment_prefix,
                max_line_length,
                delimiter,
                bad_lines,
                echo_bad_lines,
            },
            ipset: IpSetConfig { auto_convert },
            sampling: SamplingConfig { seed },
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}
