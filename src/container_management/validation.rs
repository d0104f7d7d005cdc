use crate::container_management::types::{StartRequest, ValidatedStart, ValidationPolicy};
use crate::error_handling::types::ValidationError;

const HIGHEST_PRIVILEGED_PORT: u16 = 1024;

/// Checks every constraint and reports all violations at once.
pub fn validate(
    request: &StartRequest,
    policy: &ValidationPolicy,
) -> Result<ValidatedStart, Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !request.mount.exists() {
        errors.push(ValidationError::MountMissing(request.mount.clone()));
    }

    let token_len = request.token.chars().count();
    if token_len == 0 {
        errors.push(ValidationError::TokenEmpty);
    } else if token_len < policy.min_token_length {
        errors.push(ValidationError::TokenTooShort(policy.min_token_length));
    }

    let port = match parse_port(&request.port) {
        Ok(port) => {
            if policy.require_unprivileged_port && port <= HIGHEST_PRIVILEGED_PORT {
                errors.push(ValidationError::PortPrivileged(port));
            }
            if port == policy.aux_port {
                errors.push(ValidationError::PortClash(port));
            }
            Some(port)
        }
        Err(e) => {
            errors.push(e);
            None
        }
    };

    match port {
        Some(port) if errors.is_empty() => Ok(ValidatedStart {
            mount: request.mount.clone(),
            token: request.token.clone(),
            port,
        }),
        _ => Err(errors),
    }
}

fn parse_port(text: &str) -> Result<u16, ValidationError> {
    let value: i64 = text
        .trim()
        .parse()
        .map_err(|_| ValidationError::PortNotInteger(text.to_string()))?;
    match u16::try_from(value) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ValidationError::PortOutOfRange(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy() -> ValidationPolicy {
        ValidationPolicy {
            min_token_length: 1,
            require_unprivileged_port: true,
            aux_port: 8889,
        }
    }

    #[test]
    fn accepts_valid_request() {
        let dir = TempDir::new().unwrap();
        let ok = validate(&StartRequest::new(dir.path(), "epi2me", 8888), &policy()).unwrap();
        assert_eq!(ok.port, 8888);
        assert_eq!(ok.token, "epi2me");
    }

    #[test]
    fn reports_all_violations_together() {
        let errors = validate(
            &StartRequest::new("/definitely/not/here", "", "80"),
            &policy(),
        )
        .unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MountMissing("/definitely/not/here".into()),
                ValidationError::TokenEmpty,
                ValidationError::PortPrivileged(80),
            ]
        );
    }

    #[test]
    fn port_must_be_an_integer_in_range() {
        let dir = TempDir::new().unwrap();
        let check = |port: &str| validate(&StartRequest::new(dir.path(), "t", port), &policy());

        assert_eq!(
            check("88a8").unwrap_err(),
            vec![ValidationError::PortNotInteger("88a8".into())]
        );
        assert_eq!(
            check("70000").unwrap_err(),
            vec![ValidationError::PortOutOfRange(70000)]
        );
        assert_eq!(check("0").unwrap_err(), vec![ValidationError::PortOutOfRange(0)]);
        assert_eq!(check(" 9000 ").unwrap().port, 9000);
    }

    #[test]
    fn port_must_not_clash_with_aux_port() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            validate(&StartRequest::new(dir.path(), "t", 8889), &policy()).unwrap_err(),
            vec![ValidationError::PortClash(8889)]
        );
    }

    #[test]
    fn policy_controls_token_length_and_privileged_ports() {
        let dir = TempDir::new().unwrap();
        let strict = ValidationPolicy {
            min_token_length: 8,
            ..policy()
        };
        assert_eq!(
            validate(&StartRequest::new(dir.path(), "short", 8888), &strict).unwrap_err(),
            vec![ValidationError::TokenTooShort(8)]
        );

        let relaxed = ValidationPolicy {
            require_unprivileged_port: false,
            ..policy()
        };
        assert_eq!(
            validate(&StartRequest::new(dir.path(), "t", 80), &relaxed).unwrap().port,
            80
        );
    }
}
