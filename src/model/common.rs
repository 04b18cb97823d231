use uuid::Uuid;

pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Opaque token used for sessions and password reset links
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Case-insensitive equality used for natural-key matching against upstream
pub fn same_natural_key(left: &str, right: &str) -> bool {
    left.trim().to_lowercase() == right.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_keys_ignore_case_and_padding() {
        assert!(same_natural_key("Acme GmbH", "acme gmbh"));
        assert!(same_natural_key(" Website Relaunch ", "WEBSITE RELAUNCH"));
        assert!(!same_natural_key("Acme", "Acme Corp"));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
        assert_eq!(generate_token().len(), 32);
    }
}
