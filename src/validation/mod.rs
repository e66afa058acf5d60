/// Credential and profile validation
///
/// Pure structural checks run before any I/O. Every validator returns a
/// `ValidationResult` listing all problems found, not just the first.
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    static ref NAME: Regex = Regex::new(r"^[a-zA-Z\s'-]+$").unwrap();
    static ref SEQUENTIAL: Regex = Regex::new(r"(?i)123456|abcdef|qwerty").unwrap();
}

const COMMON_DOMAINS: [&str; 4] = ["gmail.com", "yahoo.com", "hotmail.com", "outlook.com"];

const COMMON_PASSWORDS: [&str; 10] = [
    "password",
    "123456",
    "123456789",
    "qwerty",
    "abc123",
    "password123",
    "admin",
    "letmein",
    "welcome",
    "monkey",
];

const SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>";

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Outcome of a validation pass
///
/// `suggestions` carries hints (such as email domain typos) that never make
/// the input invalid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            suggestions: Vec::new(),
        }
    }

    fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.suggestions.extend(other.suggestions);
        self.is_valid = self.errors.is_empty();
    }
}

/// Signup fields as submitted
#[derive(Debug, Clone, Default)]
pub struct SignupData<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub confirm_password: &'a str,
    pub role: &'a str,
    pub current_class: Option<i64>,
    pub school_name: Option<&'a str>,
}

pub fn validate_email(email: &str) -> ValidationResult {
    if email.is_empty() {
        return ValidationResult::from_errors(vec!["Email is required".to_string()]);
    }

    let mut result = ValidationResult::from_errors(Vec::new());
    if !EMAIL.is_match(email) {
        result.merge(ValidationResult::from_errors(vec![
            "Please enter a valid email address".to_string(),
        ]));
    }

    if let Some(suggestion) = suggest_email_domain(email) {
        result.suggestions.push(format!("Did you mean {}?", suggestion));
    }

    result
}

/// Closest well-known domain when the given one looks like a typo of it
fn suggest_email_domain(email: &str) -> Option<&'static str> {
    let domain = email.split('@').nth(1)?.to_lowercase();
    if domain.is_empty() || COMMON_DOMAINS.contains(&domain.as_str()) {
        return None;
    }

    COMMON_DOMAINS
        .iter()
        .find(|known| known.contains(domain.as_str()) || domain.contains(&known[..3]))
        .copied()
}

pub fn validate_password(password: &str) -> ValidationResult {
    if password.is_empty() {
        return ValidationResult::from_errors(vec!["Password is required".to_string()]);
    }

    let mut errors = Vec::new();
    let length = password.chars().count();

    if length < MIN_PASSWORD_LENGTH {
        errors.push("Password must be at least 8 characters long".to_string());
    }
    if length > MAX_PASSWORD_LENGTH {
        errors.push("Password must be less than 128 characters".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("Password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain at least one number".to_string());
    }
    if !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        errors.push("Password must contain at least one special character".to_string());
    }

    if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        errors.push("This password is too common. Please choose a stronger password".to_string());
    }
    if SEQUENTIAL.is_match(password) {
        errors.push("Avoid using sequential characters in your password".to_string());
    }

    ValidationResult::from_errors(errors)
}

pub fn validate_name(name: &str) -> ValidationResult {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return ValidationResult::from_errors(vec!["Name is required".to_string()]);
    }

    let mut errors = Vec::new();
    let length = trimmed.chars().count();

    if length < 2 {
        errors.push("Name must be at least 2 characters long".to_string());
    }
    if length > 50 {
        errors.push("Name must be less than 50 characters".to_string());
    }
    if !NAME.is_match(trimmed) {
        errors.push("Name can only contain letters, spaces, hyphens, and apostrophes".to_string());
    }

    ValidationResult::from_errors(errors)
}

pub fn validate_school_name(school_name: &str) -> ValidationResult {
    if school_name.chars().count() > 100 {
        return ValidationResult::from_errors(vec![
            "School name must be less than 100 characters".to_string(),
        ]);
    }
    ValidationResult::from_errors(Vec::new())
}

pub fn validate_class(current_class: i64) -> ValidationResult {
    if !(9..=12).contains(&current_class) {
        return ValidationResult::from_errors(vec!["Class must be between 9 and 12".to_string()]);
    }
    ValidationResult::from_errors(Vec::new())
}

pub fn validate_signup_data(data: &SignupData<'_>) -> ValidationResult {
    let mut result = validate_name(data.name);
    result.merge(validate_email(data.email));
    result.merge(validate_password(data.password));

    let mut errors = Vec::new();
    if data.password != data.confirm_password {
        errors.push("Passwords do not match".to_string());
    }
    if !matches!(data.role, "student" | "admin") {
        errors.push("Invalid role selected".to_string());
    }
    result.merge(ValidationResult::from_errors(errors));

    if let Some(current_class) = data.current_class {
        result.merge(validate_class(current_class));
    }
    if let Some(school_name) = data.school_name.filter(|s| !s.is_empty()) {
        result.merge(validate_school_name(school_name));
    }

    result
}

pub fn validate_login_data(email: &str, password: &str) -> ValidationResult {
    let mut errors = Vec::new();

    if email.is_empty() {
        errors.push("Email is required".to_string());
    }
    if password.is_empty() {
        errors.push("Password is required".to_string());
    }
    if !email.is_empty() && !EMAIL.is_match(email) {
        errors.push("Please enter a valid email address".to_string());
    }

    ValidationResult::from_errors(errors)
}

/// Password strength estimate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordStrength {
    /// 0 to 100
    pub score: u8,
    pub feedback: Vec<String>,
}

pub fn password_strength(password: &str) -> PasswordStrength {
    let mut score: i32 = 0;
    let mut feedback = Vec::new();
    let length = password.chars().count();

    let checks: [(bool, i32, &str); 5] = [
        (length >= MIN_PASSWORD_LENGTH, 20, "Use at least 8 characters"),
        (password.chars().any(|c| c.is_ascii_lowercase()), 15, "Add lowercase letters"),
        (password.chars().any(|c| c.is_ascii_uppercase()), 15, "Add uppercase letters"),
        (password.chars().any(|c| c.is_ascii_digit()), 15, "Add numbers"),
        (password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)), 15, "Add special characters"),
    ];
    for (passed, points, hint) in checks {
        if passed {
            score += points;
        } else {
            feedback.push(hint.to_string());
        }
    }

    if length >= 12 {
        score += 10;
    }
    if length >= 16 {
        score += 10;
    }

    if SEQUENTIAL.is_match(password) {
        score -= 20;
        feedback.push("Avoid common patterns".to_string());
    }

    PasswordStrength {
        score: score.clamp(0, 100) as u8,
        feedback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup<'a>(password: &'a str, confirm: &'a str) -> SignupData<'a> {
        SignupData {
            name: "Ada Lovelace",
            email: "ada@x.com",
            password,
            confirm_password: confirm,
            role: "student",
            current_class: Some(10),
            school_name: Some("Delhi Public School"),
        }
    }

    #[test]
    fn test_password_policy_examples() {
        assert!(validate_password("Password1!").is_valid);
        assert!(validate_password("Str0ng!Pass").is_valid);

        let weak = validate_password("password");
        assert!(!weak.is_valid);
        assert!(weak
            .errors
            .contains(&"This password is too common. Please choose a stronger password".to_string()));
        assert!(weak
            .errors
            .contains(&"Password must contain at least one uppercase letter".to_string()));

        let sequential = validate_password("Qwerty123!");
        assert!(!sequential.is_valid);
        assert_eq!(
            sequential.errors,
            vec!["Avoid using sequential characters in your password".to_string()]
        );
    }

    #[test]
    fn test_password_length_bounds() {
        assert_eq!(
            validate_password("Ab1!").errors,
            vec!["Password must be at least 8 characters long".to_string()]
        );
        let long = format!("Ab1!{}", "x".repeat(MAX_PASSWORD_LENGTH));
        assert!(!validate_password(&long).is_valid);
        assert_eq!(validate_password("").errors, vec!["Password is required".to_string()]);
    }

    #[test]
    fn test_email_shape() {
        assert!(validate_email("ada@x.com").is_valid);
        assert!(!validate_email("ada@x").is_valid);
        assert!(!validate_email("ada x@x.com").is_valid);
        assert_eq!(validate_email("").errors, vec!["Email is required".to_string()]);
    }

    #[test]
    fn test_email_typo_is_a_suggestion_only() {
        let result = validate_email("ada@gmai.com");
        assert!(result.is_valid);
        assert_eq!(result.suggestions, vec!["Did you mean gmail.com?".to_string()]);

        assert!(validate_email("ada@gmail.com").suggestions.is_empty());
        assert!(validate_email("ada@school.edu").suggestions.is_empty());
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("Ada").is_valid);
        assert!(validate_name("Mary-Jane O'Neil").is_valid);
        assert!(!validate_name("A").is_valid);
        assert!(!validate_name("R2D2").is_valid);
        assert!(!validate_name(&"a".repeat(51)).is_valid);
        assert_eq!(validate_name("   ").errors, vec!["Name is required".to_string()]);
    }

    #[test]
    fn test_class_and_school() {
        assert!(validate_class(9).is_valid);
        assert!(validate_class(12).is_valid);
        assert!(!validate_class(8).is_valid);
        assert!(!validate_class(13).is_valid);
        assert!(validate_school_name("Kendriya Vidyalaya").is_valid);
        assert!(!validate_school_name(&"s".repeat(101)).is_valid);
    }

    #[test]
    fn test_signup_mismatched_confirmation_always_fails() {
        assert!(validate_signup_data(&signup("Str0ng!Pass", "Str0ng!Pass")).is_valid);

        let result = validate_signup_data(&signup("Str0ng!Pass", "Str0ng!Pas"));
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["Passwords do not match".to_string()]);
    }

    #[test]
    fn test_signup_collects_every_error() {
        let data = SignupData {
            name: "",
            email: "nope",
            password: "Str0ng!Pass",
            confirm_password: "Str0ng!Pass",
            role: "teacher",
            current_class: Some(7),
            school_name: None,
        };

        let result = validate_signup_data(&data);
        assert_eq!(
            result.errors,
            vec![
                "Name is required".to_string(),
                "Please enter a valid email address".to_string(),
                "Invalid role selected".to_string(),
                "Class must be between 9 and 12".to_string(),
            ]
        );
    }

    #[test]
    fn test_login_data() {
        assert!(validate_login_data("ada@x.com", "anything").is_valid);
        assert_eq!(
            validate_login_data("", "").errors,
            vec!["Email is required".to_string(), "Password is required".to_string()]
        );
        assert_eq!(
            validate_login_data("ada", "pw").errors,
            vec!["Please enter a valid email address".to_string()]
        );
    }

    #[test]
    fn test_password_strength() {
        let strong = password_strength("Str0ng!Password#2024");
        assert_eq!(strong.score, 100);
        assert!(strong.feedback.is_empty());

        let weak = password_strength("qwerty");
        assert_eq!(weak.score, 0);
        assert!(weak.feedback.contains(&"Avoid common patterns".to_string()));

        assert_eq!(password_strength("Password1!").score, 80);
    }
}
