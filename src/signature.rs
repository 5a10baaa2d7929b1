//! Method lookup keys - `Namespace.ClassName:MethodName (type1,type2)`
//!
//! A key resolves a foreign method by class, name, parameter count and the
//! textual parameter type tokens. A key without a parameter list matches
//! any overload of the name.

use crate::error::SignatureError;
use std::fmt;
use std::str::FromStr;

/// Parsed method lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    namespace: String,
    class: String,
    method: String,
    params: Option<Vec<String>>,
}

impl MethodSignature {
    pub fn new<I, S>(namespace: &str, class: &str, method: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespace: namespace.to_string(),
            class: class.to_string(),
            method: method.to_string(),
            params: Some(params.into_iter().map(Into::into).collect()),
        }
    }

    /// Key that matches the method by name regardless of parameters
    pub fn any_arity(namespace: &str, class: &str, method: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            class: class.to_string(),
            method: method.to_string(),
            params: None,
        }
    }

    /// Build a key from a dotted full class name (`A.B.Class`)
    pub fn for_class<I, S>(full_class: &str, method: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (namespace, class) = split_class(full_class);
        Self::new(namespace, class, method, params)
    }

    pub fn parse(key: &str) -> Result<Self, SignatureError> {
        let (class_part, method_part) = key
            .split_once(':')
            .ok_or_else(|| SignatureError::MissingClassSeparator(key.to_string()))?;

        let class_part = class_part.trim();
        let (namespace, class) = split_class(class_part);
        if class.is_empty() {
            return Err(SignatureError::EmptyClassName(key.to_string()));
        }

        let method_part = method_part.trim();
        let (method, params) = match method_part.split_once('(') {
            Some((name, rest)) => {
                let inner = rest
                    .trim_end()
                    .strip_suffix(')')
                    .ok_or_else(|| SignatureError::UnterminatedParameters(key.to_string()))?;
                let params = inner
                    .split(',')
                    .map(normalize_token)
                    .filter(|token| !token.is_empty())
                    .collect();
                (name.trim(), Some(params))
            }
            None => (method_part, None),
        };

        if method.is_empty() {
            return Err(SignatureError::EmptyMethodName(key.to_string()));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            class: class.to_string(),
            method: method.to_string(),
            params,
        })
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    pub fn class(&self) -> &str {
        &self.class
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[inline]
    pub fn params(&self) -> Option<&[String]> {
        self.params.as_deref()
    }

    /// Parameter count, or `None` for an any-arity key
    #[inline]
    pub fn arity(&self) -> Option<usize> {
        self.params.as_ref().map(Vec::len)
    }

    pub fn full_class_name(&self) -> String {
        if self.namespace.is_empty() {
            self.class.clone()
        } else {
            format!("{}.{}", self.namespace, self.class)
        }
    }

    /// Whether `declared` (a concrete method signature) satisfies this key
    pub fn matches(&self, declared: &MethodSignature) -> bool {
        if self.namespace != declared.namespace
            || self.class != declared.class
            || self.method != declared.method
        {
            return false;
        }

        match (&self.params, &declared.params) {
            (None, _) => true,
            (Some(wanted), Some(have)) => wanted == have,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.namespace.is_empty() {
            write!(f, "{}.", self.namespace)?;
        }
        write!(f, "{}:{}", self.class, self.method)?;
        if let Some(params) = &self.params {
            write!(f, " ({})", params.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for MethodSignature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_class(full: &str) -> (&str, &str) {
    match full.rsplit_once('.') {
        Some((namespace, class)) => (namespace, class),
        None => ("", full),
    }
}

fn normalize_token(token: &str) -> String {
    token.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_key() {
        let sig = MethodSignature::parse("Game.Logic.Player:Scale (int,int&)").unwrap();
        assert_eq!(sig.namespace(), "Game.Logic");
        assert_eq!(sig.class(), "Player");
        assert_eq!(sig.method(), "Scale");
        assert_eq!(sig.params(), Some(&["int".to_string(), "int&".to_string()][..]));
        assert_eq!(sig.full_class_name(), "Game.Logic.Player");
    }

    #[test]
    fn test_parse_constructor_and_empty_params() {
        let sig = MethodSignature::parse("Engine.Actor:.ctor ()").unwrap();
        assert_eq!(sig.method(), ".ctor");
        assert_eq!(sig.arity(), Some(0));
    }

    #[test]
    fn test_parse_without_namespace_or_params() {
        let sig = MethodSignature::parse("Actor:Tick").unwrap();
        assert_eq!(sig.namespace(), "");
        assert_eq!(sig.arity(), None);
    }

    #[test]
    fn test_display_roundtrip() {
        let key = "Interop.Engine.ObjectFactory:WriteArray (intptr,intptr,System.Collections.IEnumerable)";
        let sig: MethodSignature = key.parse().unwrap();
        assert_eq!(sig.to_string(), key);
    }

    #[test]
    fn test_whitespace_in_params_is_ignored() {
        let a = MethodSignature::parse("A.B:M (int, float)").unwrap();
        let b = MethodSignature::parse("A.B:M (int,float)").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_matches() {
        let declared = MethodSignature::parse("A.B:Add (int,int)").unwrap();
        assert!(MethodSignature::parse("A.B:Add (int,int)").unwrap().matches(&declared));
        assert!(MethodSignature::parse("A.B:Add").unwrap().matches(&declared));
        assert!(!MethodSignature::parse("A.B:Add (int)").unwrap().matches(&declared));
        assert!(!MethodSignature::parse("A.C:Add").unwrap().matches(&declared));
    }

    #[test]
    fn test_malformed_keys() {
        assert!(matches!(
            MethodSignature::parse("NoSeparator"),
            Err(SignatureError::MissingClassSeparator(_))
        ));
        assert!(matches!(
            MethodSignature::parse("A.B: (int)"),
            Err(SignatureError::EmptyMethodName(_))
        ));
        assert!(matches!(
            MethodSignature::parse("A.B:M (int"),
            Err(SignatureError::UnterminatedParameters(_))
        ));
        assert!(matches!(
            MethodSignature::parse(":M ()"),
            Err(SignatureError::EmptyClassName(_))
        ));
    }
}
