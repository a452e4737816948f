//! Opaque unit-of-work side effects.
//!
//! A procedure is queued like any other operation and handed to the data
//! source in the last flush stage. Keel never looks inside; data sources
//! downcast through [`Procedure::as_any`] to the procedure types they know.

use std::any::Any;
use std::fmt::Debug;

/// A backend-defined side effect.
pub trait Procedure: Debug + Send + Sync + 'static {
    /// Short name for logs and journals.
    fn name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct RecountStock {
        warehouse: u32,
    }

    impl Procedure for RecountStock {
        fn name(&self) -> &str {
            "recount_stock"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_downcast_through_any() {
        let procedure: Box<dyn Procedure> = Box::new(RecountStock { warehouse: 4 });
        assert_eq!(procedure.name(), "recount_stock");

        let concrete = procedure.as_any().downcast_ref::<RecountStock>().unwrap();
        assert_eq!(concrete.warehouse, 4);
    }
}
