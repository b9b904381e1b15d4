use super::models::Config;
use crate::query::MediaQuery;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Timeout must be positive: {field}")]
    ZeroTimeout { field: String },

    #[error("Codec list '{field}' is empty")]
    EmptyCodecList { field: String },

    #[error("Drain batch must be positive")]
    ZeroDrainBatch,

    #[error("Local query #{index} names neither a directory nor files")]
    EmptyLocalQuery { index: usize },

    #[error("Remote query #{index} has no URLs")]
    EmptyRemoteQuery { index: usize },

    #[error("Tag list '{field}' contains a blank tag")]
    BlankTag { field: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_timeouts(config)?;
    validate_codecs(config)?;
    validate_runtime(config)?;
    validate_tags("filter.blacklist_tags", &config.filter.blacklist_tags)?;
    validate_tags("filter.whitelist_tags", &config.filter.whitelist_tags)?;
    validate_queries(config)?;
    Ok(())
}

fn validate_timeouts(config: &Config) -> Result<(), ValidationError> {
    let timeouts = [
        ("fetch.timeout_secs", config.fetch.timeout_secs),
        ("fetch.connect_timeout_secs", config.fetch.connect_timeout_secs),
        ("runtime.tick_ms", config.runtime.tick_ms),
    ];

    for (field, value) in timeouts {
        if value == 0 {
            return Err(ValidationError::ZeroTimeout {
                field: field.to_string(),
            });
        }
    }

    Ok(())
}

fn validate_codecs(config: &Config) -> Result<(), ValidationError> {
    if config.transcode.video_codecs.is_empty() {
        return Err(ValidationError::EmptyCodecList {
            field: "transcode.video_codecs".to_string(),
        });
    }
    if config.transcode.audio_codecs.is_empty() {
        return Err(ValidationError::EmptyCodecList {
            field: "transcode.audio_codecs".to_string(),
        });
    }

    Ok(())
}

fn validate_runtime(config: &Config) -> Result<(), ValidationError> {
    if config.runtime.drain_batch == 0 {
        return Err(ValidationError::ZeroDrainBatch);
    }

    Ok(())
}

fn validate_tags(field: &str, tags: &[String]) -> Result<(), ValidationError> {
    if tags.iter().any(|tag| tag.trim().is_empty()) {
        return Err(ValidationError::BlankTag {
            field: field.to_string(),
        });
    }

    Ok(())
}

fn validate_queries(config: &Config) -> Result<(), ValidationError> {
    for (index, query) in config.queries.iter().enumerate() {
        match query {
            MediaQuery::Local {
                directory, files, ..
            } if directory.is_none() && files.is_empty() => {
                return Err(ValidationError::EmptyLocalQuery { index });
            }
            MediaQuery::Remote { urls, .. } if urls.is_empty() => {
                return Err(ValidationError::EmptyRemoteQuery { index });
            }
            _ => {}
        }

        validate_tags(&format!("queries[{index}].tags"), query.tags())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MediaRating;
    use std::path::PathBuf;

    fn create_test_config() -> Config {
        Config {
            queries: vec![
                MediaQuery::Local {
                    directory: Some(PathBuf::from("media")),
                    files: vec![],
                    rating: MediaRating::Safe,
                    tags: vec![],
                },
                MediaQuery::Remote {
                    urls: vec!["https://i.example.com/a.png".to_string()],
                    rating: MediaRating::Safe,
                    tags: vec!["cats".to_string()],
                },
            ],
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = create_test_config();
        config.fetch.timeout_secs = 0;

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::ZeroTimeout { .. })));
    }

    #[test]
    fn test_empty_codec_list() {
        let mut config = create_test_config();
        config.transcode.audio_codecs.clear();

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::EmptyCodecList { .. })));
    }

    #[test]
    fn test_zero_drain_batch() {
        let mut config = create_test_config();
        config.runtime.drain_batch = 0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroDrainBatch)
        ));
    }

    #[test]
    fn test_empty_queries() {
        let mut config = create_test_config();
        config.queries.push(MediaQuery::Local {
            directory: None,
            files: vec![],
            rating: MediaRating::Safe,
            tags: vec![],
        });

        assert!(matches!(
            validate(&config),
            Err(ValidationError::EmptyLocalQuery { index: 2 })
        ));

        config.queries.pop();
        config.queries.push(MediaQuery::Remote {
            urls: vec![],
            rating: MediaRating::Safe,
            tags: vec![],
        });
        assert!(matches!(
            validate(&config),
            Err(ValidationError::EmptyRemoteQuery { index: 2 })
        ));
    }

    #[test]
    fn test_blank_tags() {
        let mut config = create_test_config();
        config.filter.blacklist_tags = vec!["  ".to_string()];

        assert!(matches!(
            validate(&config),
            Err(ValidationError::BlankTag { .. })
        ));
    }
}
