//! Function call linker - native parameters bound to foreign arguments by name

use crate::error::LinkError;
use crate::marshal::{Marshaller, MarshallerRegistry};
use crate::property::{ForeignMethodDescriptor, FunctionDescriptor};
use smallvec::SmallVec;

/// One foreign argument: where its value lives natively and how it crosses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkedArgument {
    /// Index into `FunctionDescriptor::params`
    pub native_index: usize,
    pub marshaller: Marshaller,
    pub by_ref: bool,
    /// Byte offset of this argument's slot in the call scratch buffer
    pub scratch_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkedReturn {
    pub native_index: usize,
    pub marshaller: Marshaller,
}

/// Per-function binding, built once and reused by every call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCallLinker {
    /// Foreign declaration order
    arguments: SmallVec<[LinkedArgument; 8]>,
    return_value: Option<LinkedReturn>,
    /// Native index to position in `arguments`
    by_native: SmallVec<[Option<usize>; 8]>,
    scratch_size: usize,
}

impl FunctionCallLinker {
    pub fn link(
        registry: &MarshallerRegistry,
        function: &FunctionDescriptor,
        method: &ForeignMethodDescriptor,
    ) -> Result<Self, LinkError> {
        let mut arguments = SmallVec::new();
        let mut return_value = None;
        let mut by_native: SmallVec<[Option<usize>; 8]> = SmallVec::from_elem(None, function.params.len());
        let mut scratch_size = 0usize;

        for argument in &method.arguments {
            let (native_index, property) =
                function
                    .find_param(&argument.name)
                    .ok_or_else(|| LinkError::MissingParameter {
                        function: function.qualified_name(),
                        method: method.signature.to_string(),
                        parameter: argument.name.clone(),
                    })?;

            let already_bound = by_native[native_index].is_some()
                || return_value.map_or(false, |r: LinkedReturn| r.native_index == native_index);
            if already_bound {
                return Err(LinkError::DuplicateParameter {
                    function: function.qualified_name(),
                    parameter: argument.name.clone(),
                });
            }

            let marshaller = registry.resolve(property)?;

            if argument.is_return_value() || property.is_return() {
                if argument.is_return_value() != property.is_return() {
                    return Err(LinkError::ReturnMismatch {
                        function: function.qualified_name(),
                        method: method.signature.to_string(),
                    });
                }
                return_value = Some(LinkedReturn {
                    native_index,
                    marshaller,
                });
                continue;
            }

            by_native[native_index] = Some(arguments.len());
            arguments.push(LinkedArgument {
                native_index,
                marshaller,
                by_ref: argument.is_pass_by_reference(),
                scratch_offset: scratch_size,
            });
            scratch_size += marshaller.slot_size();
        }

        Ok(Self {
            arguments,
            return_value,
            by_native,
            scratch_size,
        })
    }

    /// Linked arguments in foreign declaration order
    #[inline]
    pub fn arguments(&self) -> &[LinkedArgument] {
        &self.arguments
    }

    #[inline]
    pub fn return_value(&self) -> Option<LinkedReturn> {
        self.return_value
    }

    /// Argument bound to native parameter `native_index`
    pub fn for_native(&self, native_index: usize) -> Option<&LinkedArgument> {
        self.by_native
            .get(native_index)
            .copied()
            .flatten()
            .map(|position| &self.arguments[position])
    }

    /// Total scratch bytes one call needs
    #[inline]
    pub fn scratch_size(&self) -> usize {
        self.scratch_size
    }
}
