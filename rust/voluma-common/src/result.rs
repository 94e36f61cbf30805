pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// Verifies an argument predicate, failing the surrounding function with an
/// `InvalidArgument` error naming the argument and the violated condition.
#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let ok = $expr;
        $crate::result::verify_arg(ok, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        Err(invalid_arg(name, condition))
    }
}

#[cold]
fn invalid_arg(name: &str, condition: &str) -> crate::error::Error {
    crate::error::Error::invalid_arg(name, condition)
}
