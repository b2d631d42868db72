use crate::utils::error::{AppError, AppResult};

pub const MAX_MESSAGE_LENGTH: usize = 4000;

pub fn validate_message_content(content: &str) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::Validation(
            "Message content cannot be empty".to_string(),
        ));
    }

    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(AppError::Validation(format!(
            "Message content must be at most {} characters long",
            MAX_MESSAGE_LENGTH
        )));
    }

    Ok(())
}

pub fn validate_identifier(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("Missing parameter: {}", field)));
    }

    if value.len() > 64 || value.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(AppError::BadRequest(format!("Invalid {}", field)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_content() {
        assert!(validate_message_content("").is_err());
        assert!(validate_message_content("   \n\t").is_err());
        assert!(validate_message_content(" hi ").is_ok());
    }

    #[test]
    fn rejects_oversized_content() {
        let long = "a".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(matches!(
            validate_message_content(&long),
            Err(AppError::Validation(_))
        ));
        assert!(validate_message_content(&"é".repeat(MAX_MESSAGE_LENGTH)).is_ok());
    }

    #[test]
    fn identifiers_must_be_present_and_compact() {
        assert!(validate_identifier("conversationId", "").is_err());
        assert!(validate_identifier("conversationId", "a b").is_err());
        assert!(validate_identifier("conversationId", "u-123").is_ok());
    }
}
