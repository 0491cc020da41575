//! Postgres error classification.
//!
//! Errors are sorted by SQLSTATE first and by constraint name second, so the
//! services see a missing target row as `NotFound` rather than bad input.

use crate::application::repos::RepoError;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";
const INTEGRITY_CLASS: &str = "23";
const INVALID_TEXT_REPRESENTATION: &str = "22P02";
const QUERY_CANCELED: &str = "57014";

/// Foreign keys of the like and save tables. A violation means the recipe,
/// tag or ingredient was deleted after the existence check.
const ENGAGEMENT_TARGET_KEYS: [&str; 4] = [
    "recipe_likes_recipe_id_fkey",
    "recipe_saves_recipe_id_fkey",
    "tag_saves_tag_id_fkey",
    "ingredient_saves_ingredient_id_fkey",
];

const COMMENT_RATING_CHECK: &str = "recipe_comments_rating_check";

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db) => {
            classify_database_error(db.code().as_deref(), db.constraint(), db.message())
        }
        other => RepoError::from_persistence(other),
    }
}

fn classify_database_error(
    code: Option<&str>,
    constraint: Option<&str>,
    message: &str,
) -> RepoError {
    match code {
        Some(UNIQUE_VIOLATION) => RepoError::Duplicate {
            constraint: constraint.unwrap_or("unknown").to_string(),
        },
        Some(FOREIGN_KEY_VIOLATION)
            if constraint.is_some_and(|name| ENGAGEMENT_TARGET_KEYS.contains(&name)) =>
        {
            RepoError::NotFound
        }
        Some(FOREIGN_KEY_VIOLATION) | Some(INVALID_TEXT_REPRESENTATION) => {
            RepoError::InvalidInput {
                message: message.to_string(),
            }
        }
        Some(CHECK_VIOLATION) if constraint == Some(COMMENT_RATING_CHECK) => {
            RepoError::InvalidInput {
                message: "rating must be between 1 and 5".to_string(),
            }
        }
        Some(QUERY_CANCELED) => RepoError::Timeout,
        Some(code) if code.starts_with(INTEGRITY_CLASS) => RepoError::Integrity {
            message: message.to_string(),
        },
        _ => RepoError::from_persistence(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleted_engagement_target_is_not_found() {
        for key in ENGAGEMENT_TARGET_KEYS {
            let err = classify_database_error(
                Some(FOREIGN_KEY_VIOLATION),
                Some(key),
                "insert or update violates foreign key constraint",
            );
            assert!(matches!(err, RepoError::NotFound), "{key}");
        }
    }

    #[test]
    fn other_foreign_keys_stay_invalid_input() {
        let err = classify_database_error(
            Some(FOREIGN_KEY_VIOLATION),
            Some("recipe_tags_tag_id_fkey"),
            "insert or update violates foreign key constraint",
        );
        assert!(matches!(err, RepoError::InvalidInput { .. }));
    }

    #[test]
    fn rating_check_is_a_validation_error() {
        let err = classify_database_error(
            Some(CHECK_VIOLATION),
            Some(COMMENT_RATING_CHECK),
            "new row violates check constraint",
        );
        match err {
            RepoError::InvalidInput { message } => assert!(message.contains("rating")),
            other => panic!("unexpected mapping: {other}"),
        }

        let err = classify_database_error(Some(CHECK_VIOLATION), Some("other_check"), "violates");
        assert!(matches!(err, RepoError::Integrity { .. }));
    }

    #[test]
    fn unique_cancel_and_unknown_codes() {
        let err = classify_database_error(
            Some(UNIQUE_VIOLATION),
            Some("tags_name_key"),
            "duplicate key value",
        );
        assert!(matches!(err, RepoError::Duplicate { constraint } if constraint == "tags_name_key"));

        let err = classify_database_error(Some(QUERY_CANCELED), None, "canceling statement");
        assert!(matches!(err, RepoError::Timeout));

        let err = classify_database_error(Some("08006"), None, "connection failure");
        assert!(matches!(err, RepoError::Persistence(_)));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            RepoError::NotFound
        ));
    }
}
