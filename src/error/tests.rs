//! Tests for error types.

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("maxFileSize cannot be 0");
        assert_eq!(err.to_string(), "configuration error: maxFileSize cannot be 0");
    }

    #[test]
    fn test_storage_error_not_found() {
        let err = StorageError::not_found("index", "r1");
        assert_eq!(err.to_string(), "not found: index with id 'r1'");
    }

    #[test]
    fn test_storage_error_corrupt() {
        let err = StorageError::corrupt("r1", "checksum mismatch");
        assert_eq!(err.to_string(), "corrupt index for 'r1': checksum mismatch");
    }

    #[test]
    fn test_registry_error_conversion() {
        let err: Error = RegistryError::NotFound("r1".to_string()).into();
        assert!(matches!(err, Error::Registry(_)));
        assert_eq!(err.to_string(), "registry error: repository 'r1' not found");
    }

    #[test]
    fn test_index_error_unreadable() {
        let err = IndexError::unreadable("/repos/r1", "permission denied");
        assert_eq!(
            err.to_string(),
            "repository path '/repos/r1' is unreadable: permission denied"
        );
    }

    #[test]
    fn test_index_error_limit_exceeded() {
        let err = IndexError::LimitExceeded {
            limit: crate::storage::Limit::TrigramCount,
            actual: 3,
            max: 2,
        };
        assert_eq!(err.to_string(), "trigram count limit exceeded: 3 > 2");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_corrupt_counts_as_not_found() {
        let missing: Error = StorageError::not_found("index", "r1").into();
        let corrupt: Error = StorageError::corrupt("r1", "truncated").into();
        let unknown: Error = RegistryError::NotFound("r1".to_string()).into();

        assert!(missing.is_not_found());
        assert!(corrupt.is_not_found());
        assert!(unknown.is_not_found());
        assert!(!Error::internal("boom").is_not_found());
    }

    #[test]
    fn test_only_unwritable_storage_is_fatal() {
        let fatal: Error = StorageError::unwritable("/cache/index", "read-only filesystem").into();
        assert!(fatal.is_fatal());

        let unreadable: Error = IndexError::unreadable("/repos/r1", "gone").into();
        assert!(!unreadable.is_fatal());

        let cancelled: Error = IndexError::Cancelled.into();
        assert!(!cancelled.is_fatal());
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_error_propagation_with_question_mark() {
        fn inner() -> Result<i32> {
            Err(Error::config("inner error"))
        }

        fn outer() -> Result<i32> {
            let _ = inner()?;
            Ok(0)
        }

        let result = outer();
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().to_string(),
            "configuration error: inner error"
        );
    }

    #[test]
    fn test_error_debug_format() {
        let err = Error::Internal("something went wrong".to_string());
        let debug_str = format!("{err:?}");
        assert!(debug_str.contains("Internal"));
        assert!(debug_str.contains("something went wrong"));
    }
}
