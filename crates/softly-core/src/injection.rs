//! What a test runner tells the binder about fields and parameters it
//! wants filled with providers, and the checks applied to them.

use crate::provider::ProviderType;
use softly_proto::{Error, Result};
use std::fmt;

/// The declared type of a field or parameter.
#[derive(Debug, Clone)]
pub enum DeclaredType {
    Provider(ProviderType),
    /// Anything that is not a provider, by type name.
    Other(String),
}

impl DeclaredType {
    pub fn type_name(&self) -> &str {
        match self {
            DeclaredType::Provider(provider) => provider.name(),
            DeclaredType::Other(name) => name,
        }
    }
}

/// A field of a test-class instance marked for provider injection.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub is_static: bool,
    pub is_final: bool,
    pub declared: DeclaredType,
}

impl FieldDescriptor {
    pub fn provider(name: impl Into<String>, provider: ProviderType) -> Self {
        Self {
            name: name.into(),
            is_static: false,
            is_final: false,
            declared: DeclaredType::Provider(provider),
        }
    }

    pub fn other(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_static: false,
            is_final: false,
            declared: DeclaredType::Other(type_name.into()),
        }
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn as_final(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Checks the field can receive a provider and returns the type to bind.
    pub fn validate(&self) -> Result<&ProviderType> {
        if self.is_static || self.is_final {
            return Err(Error::Configuration(format!(
                "[{}] SoftAssertionsProvider field must not be static or final.",
                self.name
            )));
        }
        let provider = match &self.declared {
            DeclaredType::Provider(provider) => provider,
            DeclaredType::Other(type_name) => {
                return Err(Error::Configuration(format!(
                    "[{}] field is not a SoftAssertionsProvider ({type_name}).",
                    self.name
                )));
            }
        };
        if provider.is_abstract() {
            return Err(Error::Configuration(format!(
                "[{}] SoftAssertionsProvider [{}] is abstract and cannot be instantiated.",
                self.name,
                provider.name()
            )));
        }
        if !provider.has_default_constructor() {
            return Err(Error::Configuration(format!(
                "[{}] SoftAssertionsProvider [{}] does not have a default constructor",
                self.name,
                provider.name()
            )));
        }
        Ok(provider)
    }
}

/// The function or constructor a parameter belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub name: String,
    pub is_test_method: bool,
}

impl Executable {
    pub fn test_method(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_test_method: true,
        }
    }

    /// A constructor, lifecycle hook or helper.
    pub fn other(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_test_method: false,
        }
    }
}

impl fmt::Display for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub name: String,
    pub declaring: Executable,
    pub declared: DeclaredType,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, declaring: Executable, declared: DeclaredType) -> Self {
        Self {
            name: name.into(),
            declaring,
            declared,
        }
    }

    /// Whether the binder should resolve this parameter.
    ///
    /// Non-provider parameters are left to other resolvers (`Ok(false)`).
    /// Provider parameters outside test methods, or of a type that cannot
    /// be instantiated, are configuration errors.
    pub fn check(&self) -> Result<bool> {
        let DeclaredType::Provider(provider) = &self.declared else {
            return Ok(false);
        };
        if !self.declaring.is_test_method {
            return Err(Error::Configuration(format!(
                "cannot resolve SoftAssertionsProvider instances for [{}]. Only test methods are supported.",
                self.declaring
            )));
        }
        if provider.is_abstract() {
            return Err(Error::Configuration(format!(
                "the resolved SoftAssertionsProvider implementation [{}] is abstract and cannot be instantiated.",
                provider.name()
            )));
        }
        if !provider.has_default_constructor() {
            return Err(Error::Configuration(format!(
                "the resolved SoftAssertionsProvider implementation [{}] has no default constructor and cannot be instantiated.",
                provider.name()
            )));
        }
        Ok(true)
    }

    pub fn provider_type(&self) -> Option<&ProviderType> {
        match &self.declared {
            DeclaredType::Provider(provider) => Some(provider),
            DeclaredType::Other(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertions::SoftAssertions;
    use crate::provider::SoftAssertionsProvider;

    #[test]
    fn test_valid_field() {
        let field = FieldDescriptor::provider("softly", ProviderType::of::<SoftAssertions>());
        assert!(field.validate().is_ok());
    }

    #[test]
    fn test_static_or_final_field_rejected() {
        for field in [
            FieldDescriptor::provider("softly", ProviderType::of::<SoftAssertions>()).as_static(),
            FieldDescriptor::provider("softly", ProviderType::of::<SoftAssertions>()).as_final(),
        ] {
            let err = field.validate().unwrap_err();
            assert_eq!(
                err.to_string(),
                "Configuration error: [softly] SoftAssertionsProvider field must not be static or final."
            );
        }
    }

    #[test]
    fn test_non_provider_field_rejected() {
        let err = FieldDescriptor::other("name", "String").validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("[name] field is not a SoftAssertionsProvider (String)."));
    }

    #[test]
    fn test_abstract_and_unconstructible_fields_rejected() {
        let abstract_field = FieldDescriptor::provider(
            "softly",
            ProviderType::abstract_of::<dyn SoftAssertionsProvider>(),
        );
        assert!(abstract_field.validate().unwrap_err().to_string().contains("is abstract"));

        let no_default = FieldDescriptor::provider(
            "softly",
            ProviderType::without_default_constructor::<SoftAssertions>(),
        );
        assert!(
            no_default
                .validate()
                .unwrap_err()
                .to_string()
                .contains("does not have a default constructor")
        );
    }

    #[test]
    fn test_parameter_checks() {
        let provider = DeclaredType::Provider(ProviderType::of::<SoftAssertions>());
        let in_test = ParameterDescriptor::new("softly", Executable::test_method("t"), provider.clone());
        let in_ctor = ParameterDescriptor::new("softly", Executable::other("new"), provider);
        let unrelated = ParameterDescriptor::new(
            "count",
            Executable::test_method("t"),
            DeclaredType::Other("usize".into()),
        );

        assert!(in_test.check().unwrap());
        assert!(!unrelated.check().unwrap());
        let err = in_ctor.check().unwrap_err();
        assert!(err.to_string().contains("Only test methods are supported"));
    }

    #[test]
    fn test_unconstructible_parameter_rejected() {
        let param = ParameterDescriptor::new(
            "softly",
            Executable::test_method("t"),
            DeclaredType::Provider(ProviderType::abstract_of::<dyn SoftAssertionsProvider>()),
        );
        assert!(param.check().unwrap_err().is_configuration());
    }
}
