use thiserror::Error;

pub const MAX_NAME_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 2000;
pub const MAX_LOCATION_CHARS: usize = 500;
pub const MAX_TIME_PERIOD_CHARS: usize = 100;
pub const MAX_TAGS: usize = 20;
const MIN_TAG_CHARS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("dataset name is required")]
    MissingName,

    #[error("{field} cannot exceed {max} characters")]
    TooLong { field: &'static str, max: usize },
}

/// What the upload form collects about a dataset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub geographic_location: Option<String>,
    pub data_time_period: Option<String>,
}

impl DatasetMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.geographic_location = Some(location.into());
        self
    }

    pub fn with_time_period(mut self, period: impl Into<String>) -> Self {
        self.data_time_period = Some(period.into());
        self
    }

    /// Trim and normalise every field, rejecting what the backend would reject.
    ///
    /// Blank optional fields become `None`. Tags shorter than two characters
    /// are dropped and only the first twenty are kept.
    pub fn validated(&self) -> Result<Self, MetadataError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(MetadataError::MissingName);
        }
        check_len("dataset name", name, MAX_NAME_CHARS)?;

        let description = optional(&self.description, "description", MAX_DESCRIPTION_CHARS)?;
        let geographic_location =
            optional(&self.geographic_location, "geographic location", MAX_LOCATION_CHARS)?;
        let data_time_period =
            optional(&self.data_time_period, "data time period", MAX_TIME_PERIOD_CHARS)?;

        let tags = self
            .tags
            .iter()
            .map(|tag| tag.trim())
            .filter(|tag| tag.chars().count() >= MIN_TAG_CHARS)
            .take(MAX_TAGS)
            .map(str::to_string)
            .collect();

        Ok(Self {
            name: name.to_string(),
            description,
            tags,
            geographic_location,
            data_time_period,
        })
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), MetadataError> {
    if value.chars().count() > max {
        return Err(MetadataError::TooLong { field, max });
    }
    Ok(())
}

fn optional(
    value: &Option<String>,
    field: &'static str,
    max: usize,
) -> Result<Option<String>, MetadataError> {
    let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    check_len(field, value, max)?;
    Ok(Some(value.to_string()))
}
