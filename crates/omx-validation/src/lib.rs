//! Composable predicate validation.
//!
//! A [`ValidationRule<T>`] is a pure function from `&T` to a
//! [`ValidationResult`]. Rules compose with `and` (short-circuit on first
//! failure), `or` (pass if either passes) and `negate`. A
//! [`ValidationEngine<T>`] runs an ordered rule list, either stopping at
//! the first failure or aggregating every error.
//!
//! The order rule catalog and the asset-class factory live in
//! [`order_rules`] and [`factory`].

pub mod factory;
pub mod order_rules;

pub use factory::{execution_engine, order_engine, ValidationLimits};

// ---------------------------------------------------------------------------
// ValidationResult
// ---------------------------------------------------------------------------

/// Outcome of running one rule (or a whole engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<String>),
}

impl ValidationResult {
    pub fn valid() -> Self {
        ValidationResult::Valid
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ValidationResult::Invalid(vec![message.into()])
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn errors(&self) -> &[String] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(errors) => errors,
        }
    }

    /// Combine two results, concatenating error lists.
    pub fn merge(self, other: ValidationResult) -> ValidationResult {
        match (self, other) {
            (ValidationResult::Valid, b) => b,
            (a, ValidationResult::Valid) => a,
            (ValidationResult::Invalid(mut a), ValidationResult::Invalid(b)) => {
                a.extend(b);
                ValidationResult::Invalid(a)
            }
        }
    }

    /// Lift into the error taxonomy.
    pub fn into_error(self) -> Result<(), omx_errors::OmxError> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(errors) => Err(omx_errors::OmxError::validation_errors(&errors)),
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationRule
// ---------------------------------------------------------------------------

/// A named, pure predicate over `T`.
pub trait ValidationRule<T>: Send + Sync {
    fn name(&self) -> &str;

    fn validate(&self, value: &T) -> ValidationResult;

    /// Short-circuits: if `self` fails, `other` does not run.
    fn and<B>(self, other: B) -> And<Self, B>
    where
        Self: Sized,
        B: ValidationRule<T>,
    {
        let name = format!("{} AND {}", self.name(), other.name());
        And {
            a: self,
            b: other,
            name,
        }
    }

    /// Passes if either side passes; reports both error lists otherwise.
    fn or<B>(self, other: B) -> Or<Self, B>
    where
        Self: Sized,
        B: ValidationRule<T>,
    {
        let name = format!("{} OR {}", self.name(), other.name());
        Or {
            a: self,
            b: other,
            name,
        }
    }

    /// Inverts validity.
    fn negate(self) -> Not<Self>
    where
        Self: Sized,
    {
        let name = format!("NOT {}", self.name());
        Not { inner: self, name }
    }
}

/// `and` combinator. See [`ValidationRule::and`].
pub struct And<A, B> {
    a: A,
    b: B,
    name: String,
}

impl<T, A: ValidationRule<T>, B: ValidationRule<T>> ValidationRule<T> for And<A, B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, value: &T) -> ValidationResult {
        match self.a.validate(value) {
            ValidationResult::Valid => self.b.validate(value),
            // First failure wins; the second rule never runs.
            invalid => invalid,
        }
    }
}

/// `or` combinator. See [`ValidationRule::or`].
pub struct Or<A, B> {
    a: A,
    b: B,
    name: String,
}

impl<T, A: ValidationRule<T>, B: ValidationRule<T>> ValidationRule<T> for Or<A, B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, value: &T) -> ValidationResult {
        match self.a.validate(value) {
            ValidationResult::Valid => ValidationResult::Valid,
            first => match self.b.validate(value) {
                ValidationResult::Valid => ValidationResult::Valid,
                second => first.merge(second),
            },
        }
    }
}

/// `negate` combinator. See [`ValidationRule::negate`].
pub struct Not<R> {
    inner: R,
    name: String,
}

impl<T, R: ValidationRule<T>> ValidationRule<T> for Not<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, value: &T) -> ValidationResult {
        match self.inner.validate(value) {
            ValidationResult::Valid => {
                ValidationResult::invalid(format!("{} unexpectedly passed", self.inner.name()))
            }
            ValidationResult::Invalid(_) => ValidationResult::Valid,
        }
    }
}

/// Build a rule from a closure; handy for one-off predicates and tests.
pub struct RuleFn<F> {
    name: String,
    f: F,
}

impl<F> RuleFn<F> {
    pub fn new<T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T) -> ValidationResult + Send + Sync,
    {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<T, F> ValidationRule<T> for RuleFn<F>
where
    F: Fn(&T) -> ValidationResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, value: &T) -> ValidationResult {
        (self.f)(value)
    }
}

// ---------------------------------------------------------------------------
// ValidationEngine
// ---------------------------------------------------------------------------

/// An ordered list of rules executed against one value.
pub struct ValidationEngine<T> {
    name: String,
    rules: Vec<Box<dyn ValidationRule<T>>>,
    stop_on_first_failure: bool,
}

impl<T> ValidationEngine<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            stop_on_first_failure: false,
        }
    }

    pub fn stop_on_first_failure(mut self, stop: bool) -> Self {
        self.stop_on_first_failure = stop;
        self
    }

    pub fn add_rule(mut self, rule: impl ValidationRule<T> + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Run all rules in order. With `stop_on_first_failure` the first
    /// failing rule's errors are returned alone; otherwise every failing
    /// rule contributes.
    pub fn validate(&self, value: &T) -> ValidationResult {
        let mut acc = ValidationResult::Valid;
        for rule in &self.rules {
            let result = rule.validate(value);
            if !result.is_valid() && self.stop_on_first_failure {
                return result;
            }
            acc = acc.merge(result);
        }
        acc
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn positive() -> RuleFn<impl Fn(&i64) -> ValidationResult + Send + Sync> {
        RuleFn::new("positive", |v: &i64| {
            if *v > 0 {
                ValidationResult::valid()
            } else {
                ValidationResult::invalid("must be positive")
            }
        })
    }

    fn even() -> RuleFn<impl Fn(&i64) -> ValidationResult + Send + Sync> {
        RuleFn::new("even", |v: &i64| {
            if *v % 2 == 0 {
                ValidationResult::valid()
            } else {
                ValidationResult::invalid("must be even")
            }
        })
    }

    #[test]
    fn and_short_circuits_on_first_failure() {
        let rule = positive().and(even());
        assert!(rule.validate(&4).is_valid());
        // First failure only: -3 fails `positive`, `even` is not consulted.
        let result = rule.validate(&-3);
        assert_eq!(result.errors(), ["must be positive"]);
    }

    #[test]
    fn or_passes_if_either_passes() {
        let rule = positive().or(even());
        assert!(rule.validate(&-2).is_valid());
        assert!(rule.validate(&3).is_valid());
        let result = rule.validate(&-3);
        assert_eq!(result.errors().len(), 2);
    }

    #[test]
    fn negate_inverts() {
        let rule = positive().negate();
        assert!(rule.validate(&-1).is_valid());
        assert!(!rule.validate(&1).is_valid());
    }

    #[test]
    fn engine_aggregates_all_errors() {
        let engine = ValidationEngine::new("numbers")
            .add_rule(positive())
            .add_rule(even());
        let result = engine.validate(&-3);
        assert_eq!(result.errors().len(), 2);
    }

    #[test]
    fn engine_stops_on_first_failure_when_configured() {
        let engine = ValidationEngine::new("numbers")
            .stop_on_first_failure(true)
            .add_rule(positive())
            .add_rule(even());
        let result = engine.validate(&-3);
        assert_eq!(result.errors(), ["must be positive"]);
    }

    #[test]
    fn into_error_yields_validation_kind() {
        let err = ValidationResult::invalid("nope").into_error().unwrap_err();
        assert_eq!(err.kind(), omx_errors::ErrorKind::Validation);
        assert!(ValidationResult::valid().into_error().is_ok());
    }
}
