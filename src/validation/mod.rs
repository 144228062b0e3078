//! Password strength validators applied when a password is set.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::error::AuthError;
use crate::principal::Principal;

const COMMON_PASSWORDS: &str = include_str!("common_passwords.txt");

pub const DEFAULT_MIN_LENGTH: usize = 8;
pub const DEFAULT_MAX_SIMILARITY: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("this password is too short, it must contain at least {min_length} characters")]
    TooShort { min_length: usize },
    #[error("this password is entirely numeric")]
    EntirelyNumeric,
    #[error("this password is too common")]
    TooCommon,
    #[error("the password is too similar to the {attribute}")]
    TooSimilar { attribute: &'static str },
}

/// A single password rule.
pub trait PasswordValidator: Send + Sync {
    /// # Errors
    /// Returns the rule violation for `password`.
    fn validate(&self, password: &str, principal: Option<&Principal>)
        -> Result<(), ValidationError>;

    fn help_text(&self) -> String;
}

/// Configurable validator selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "name")]
pub enum ValidatorKind {
    UserAttributeSimilarity { max_similarity: f64 },
    MinimumLength { min_length: usize },
    Common,
    Numeric,
}

impl ValidatorKind {
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::UserAttributeSimilarity {
                max_similarity: DEFAULT_MAX_SIMILARITY,
            },
            Self::MinimumLength {
                min_length: DEFAULT_MIN_LENGTH,
            },
            Self::Common,
            Self::Numeric,
        ]
    }

    /// # Errors
    /// Returns `InvalidArgument` when `max_similarity` is below 0.1.
    pub fn build(&self) -> Result<Box<dyn PasswordValidator>, AuthError> {
        Ok(match self {
            Self::UserAttributeSimilarity { max_similarity } => {
                Box::new(UserAttributeSimilarity::new(*max_similarity)?)
            }
            Self::MinimumLength { min_length } => Box::new(MinimumLength::new(*min_length)),
            Self::Common => Box::new(CommonPassword),
            Self::Numeric => Box::new(NumericPassword),
        })
    }
}

pub struct MinimumLength {
    min_length: usize,
}

impl MinimumLength {
    #[must_use]
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }
}

impl Default for MinimumLength {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LENGTH)
    }
}

impl PasswordValidator for MinimumLength {
    fn validate(&self, password: &str, _: Option<&Principal>) -> Result<(), ValidationError> {
        if password.chars().count() < self.min_length {
            return Err(ValidationError::TooShort {
                min_length: self.min_length,
            });
        }
        Ok(())
    }

    fn help_text(&self) -> String {
        format!(
            "Your password must contain at least {} characters.",
            self.min_length
        )
    }
}

pub struct NumericPassword;

impl PasswordValidator for NumericPassword {
    fn validate(&self, password: &str, _: Option<&Principal>) -> Result<(), ValidationError> {
        if !password.is_empty() && password.chars().all(char::is_numeric) {
            return Err(ValidationError::EntirelyNumeric);
        }
        Ok(())
    }

    fn help_text(&self) -> String {
        "Your password can't be entirely numeric.".to_string()
    }
}

pub struct CommonPassword;

fn common_passwords() -> &'static HashSet<&'static str> {
    static LIST: OnceLock<HashSet<&'static str>> = OnceLock::new();
    LIST.get_or_init(|| {
        COMMON_PASSWORDS
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    })
}

impl PasswordValidator for CommonPassword {
    fn validate(&self, password: &str, _: Option<&Principal>) -> Result<(), ValidationError> {
        if common_passwords().contains(password.trim().to_lowercase().as_str()) {
            return Err(ValidationError::TooCommon);
        }
        Ok(())
    }

    fn help_text(&self) -> String {
        "Your password can't be a commonly used password.".to_string()
    }
}

/// Rejects passwords too close to the principal's username or email.
pub struct UserAttributeSimilarity {
    max_similarity: f64,
}

impl UserAttributeSimilarity {
    /// # Errors
    /// Returns `InvalidArgument` when `max_similarity` is below 0.1.
    pub fn new(max_similarity: f64) -> Result<Self, AuthError> {
        if max_similarity < 0.1 {
            return Err(AuthError::InvalidArgument(
                "max_similarity must be at least 0.1".to_string(),
            ));
        }
        Ok(Self { max_similarity })
    }
}

impl PasswordValidator for UserAttributeSimilarity {
    fn validate(&self, password: &str, principal: Option<&Principal>) -> Result<(), ValidationError> {
        let Some(principal) = principal else {
            return Ok(());
        };
        let password = password.to_lowercase();
        let attributes = [
            ("username", principal.username.as_str()),
            ("email address", principal.email.as_str()),
        ];
        for (attribute, value) in attributes {
            if value.is_empty() {
                continue;
            }
            let value = value.to_lowercase();
            if exceeds_maximum_length_ratio(&password, self.max_similarity, &value) {
                continue;
            }
            for part in attribute_parts(&value) {
                if quick_ratio(&password, part) >= self.max_similarity {
                    return Err(ValidationError::TooSimilar { attribute });
                }
            }
        }
        Ok(())
    }

    fn help_text(&self) -> String {
        "Your password can't be too similar to your other personal information.".to_string()
    }
}

/// The value split on non-word characters, plus the value itself.
fn attribute_parts(value: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = Regex::new(r"\W+").map_or_else(
        |_| Vec::new(),
        |re| re.split(value).filter(|part| !part.is_empty()).collect(),
    );
    parts.push(value);
    parts
}

/// Skip the similarity check when the password is far longer than the value.
#[allow(clippy::cast_precision_loss)]
fn exceeds_maximum_length_ratio(password: &str, max_similarity: f64, value: &str) -> bool {
    let password_len = password.chars().count();
    let value_len = value.chars().count();
    let length_bound_similarity = max_similarity / 2.0 * password_len as f64;
    password_len >= 10 * value_len && (value_len as f64) < length_bound_similarity
}

/// Upper bound on sequence similarity: shared character multiset over total length.
#[allow(clippy::cast_precision_loss)]
fn quick_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }
    let mut available: HashMap<char, usize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_default() += 1;
    }
    let mut matches = 0usize;
    for c in a.chars() {
        if let Some(count) = available.get_mut(&c) {
            if *count > 0 {
                *count -= 1;
                matches += 1;
            }
        }
    }
    2.0 * matches as f64 / total as f64
}

/// Run every validator and collect all failures.
///
/// # Errors
/// Returns `PasswordValidation` listing each rule the password violates.
pub fn validate_password(
    password: &str,
    principal: Option<&Principal>,
    validators: &[Box<dyn PasswordValidator>],
) -> Result<(), AuthError> {
    let errors: Vec<ValidationError> = validators
        .iter()
        .filter_map(|validator| validator.validate(password, principal).err())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AuthError::PasswordValidation(errors))
    }
}

#[must_use]
pub fn help_texts(validators: &[Box<dyn PasswordValidator>]) -> Vec<String> {
    validators.iter().map(|validator| validator.help_text()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Vec<Box<dyn PasswordValidator>> {
        ValidatorKind::defaults()
            .iter()
            .map(|kind| kind.build().unwrap())
            .collect()
    }

    #[test]
    fn minimum_length_counts_characters() {
        let validator = MinimumLength::default();
        assert!(validator.validate("short", None).is_err());
        assert!(validator.validate("ünïcödé!", None).is_ok());
    }

    #[test]
    fn numeric_password_is_rejected() {
        assert_eq!(
            NumericPassword.validate("12345678901", None),
            Err(ValidationError::EntirelyNumeric)
        );
        assert!(NumericPassword.validate("1234a", None).is_ok());
    }

    #[test]
    fn common_password_is_case_insensitive() {
        assert_eq!(
            CommonPassword.validate("PassWord", None),
            Err(ValidationError::TooCommon)
        );
        assert!(CommonPassword.validate("violet-kumquat-ferry", None).is_ok());
    }

    #[test]
    fn similarity_to_username_and_email() {
        let principal = Principal::new("alice", String::new()).with_email("alice.smith@example.com");
        let validator = UserAttributeSimilarity::new(DEFAULT_MAX_SIMILARITY).unwrap();
        assert_eq!(
            validator.validate("alice123", Some(&principal)),
            Err(ValidationError::TooSimilar {
                attribute: "username"
            })
        );
        assert_eq!(
            validator.validate("smithing", Some(&principal)),
            Err(ValidationError::TooSimilar {
                attribute: "email address"
            })
        );
        assert!(validator
            .validate("violet-kumquat-ferry", Some(&principal))
            .is_ok());
        assert!(validator.validate("alice123", None).is_ok());
    }

    #[test]
    fn similarity_threshold_has_a_floor() {
        assert!(UserAttributeSimilarity::new(0.05).is_err());
    }

    #[test]
    fn quick_ratio_matches_multiset_overlap() {
        assert!((quick_ratio("abcd", "bcde") - 0.75).abs() < f64::EPSILON);
        assert!((quick_ratio("abc", "abc") - 1.0).abs() < f64::EPSILON);
        assert!(quick_ratio("abc", "xyz").abs() < f64::EPSILON);
    }

    #[test]
    fn validate_password_collects_every_failure() {
        let Err(AuthError::PasswordValidation(errors)) =
            validate_password("1234", None, &defaults())
        else {
            panic!("expected validation failure");
        };
        assert_eq!(
            errors,
            vec![
                ValidationError::TooShort { min_length: 8 },
                ValidationError::TooCommon,
                ValidationError::EntirelyNumeric,
            ]
        );
        assert!(validate_password("violet-kumquat-ferry", None, &defaults()).is_ok());
    }

    #[test]
    fn help_texts_follow_validator_order() {
        let texts = help_texts(&defaults());
        assert_eq!(texts.len(), 4);
        assert!(texts[1].contains("at least 8 characters"));
    }
}
