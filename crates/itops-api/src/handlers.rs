//! Request handlers, one module per resource.

pub mod debug;
pub mod events;
pub mod health;
pub mod problems;
pub mod query;

pub use debug::*;
pub use events::*;
pub use health::*;
pub use problems::*;
pub use query::*;

use crate::ApiError;

/// Comma separated ids; blanks, zeros and garbage are skipped
pub fn parse_ids(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<u64>().ok())
        .filter(|&id| id != 0)
        .collect()
}

/// A single non-zero problem id
pub fn parse_problem_id(raw: &str) -> Result<u64, ApiError> {
    match raw.trim().parse::<u64>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(ApiError::BadRequest("problem_id 必须是有效的数字".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids_skips_garbage() {
        assert_eq!(parse_ids("1, 2,x,,0,3"), vec![1, 2, 3]);
        assert!(parse_ids("abc").is_empty());
        assert!(parse_ids("").is_empty());
    }

    #[test]
    fn test_parse_problem_id() {
        assert_eq!(parse_problem_id("42").unwrap(), 42);
        assert!(parse_problem_id("0").is_err());
        assert!(parse_problem_id("-1").is_err());
    }
}
