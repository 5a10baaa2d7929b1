//! Tests for reflection metadata

use super::*;
use crate::signature::MethodSignature;
use std::collections::HashSet;

fn layout(kind: &PropertyKind) -> ValueLayout {
    kind.plain_layout().unwrap_or(ValueLayout::new(24, 8))
}

mod kind_tests {
    use super::*;

    #[test]
    fn test_tags_are_distinct() {
        let names: HashSet<&str> = KindTag::ALL.iter().map(|tag| tag.name()).collect();
        assert_eq!(names.len(), KindTag::ALL.len());
    }

    #[test]
    fn test_plain_layouts() {
        assert_eq!(PropertyKind::bool().plain_layout(), Some(ValueLayout::new(1, 1)));
        assert_eq!(PropertyKind::Int16.plain_layout(), Some(ValueLayout::new(2, 2)));
        assert_eq!(PropertyKind::Float64.plain_layout(), Some(ValueLayout::new(8, 8)));
        assert_eq!(PropertyKind::Enum { width: 4 }.plain_layout(), Some(ValueLayout::new(4, 4)));
        assert_eq!(PropertyKind::Str.plain_layout(), None);
        assert_eq!(PropertyKind::Text.plain_layout(), None);
    }

    #[test]
    fn test_struct_layout_comes_from_info() {
        let kind = PropertyKind::Struct(StructInfo {
            name: "Vector".into(),
            foreign_full_name: "Game.Vector".into(),
            assembly: "Game".into(),
            size: 12,
            align: 4,
        });
        assert_eq!(kind.plain_layout(), Some(ValueLayout::new(12, 4)));
        assert!(!kind.is_plain_data());
        assert_eq!(kind.tag(), KindTag::Struct);
    }

    #[test]
    fn test_plain_data() {
        assert!(PropertyKind::UInt64.is_plain_data());
        assert!(PropertyKind::Object.is_plain_data());
        assert!(!PropertyKind::Name.is_plain_data());
        assert!(!PropertyKind::SoftObject.is_plain_data());
    }
}

mod function_tests {
    use super::*;

    #[test]
    fn test_offsets_follow_alignment() {
        let function = FunctionDescriptor::builder("Player", "Mixed")
            .param("flag", PropertyKind::bool())
            .param("count", PropertyKind::Int32)
            .param("small", PropertyKind::Int8)
            .param("big", PropertyKind::Int64)
            .build_with(layout);

        let offsets: Vec<usize> = function.params.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 16]);
        assert_eq!(function.params_align, 8);
        assert_eq!(function.params_size, 24);
    }

    #[test]
    fn test_parameter_flags() {
        let function = FunctionDescriptor::builder("Player", "Scale")
            .param("x", PropertyKind::Int32)
            .out_param("y", PropertyKind::Int32)
            .ref_param("z", PropertyKind::Int32)
            .returns(PropertyKind::bool())
            .build_with(layout);

        assert!(function.flags.contains(FunctionFlags::HAS_OUT_PARMS));

        let (_, x) = function.find_param("x").unwrap();
        assert!(!x.is_out());
        assert!(!x.is_reference());

        let (_, y) = function.find_param("y").unwrap();
        assert!(y.is_out());
        assert!(y.is_reference());

        let (_, z) = function.find_param("z").unwrap();
        assert!(z.is_reference());

        let ret = function.return_property().unwrap();
        assert_eq!(ret.name, RETURN_VALUE_NAME);
        assert!(ret.is_return());
        assert!(!ret.is_reference());
    }

    #[test]
    fn test_return_only_does_not_mark_out_params() {
        let function = FunctionDescriptor::builder("Math", "Pi")
            .flags(FunctionFlags::STATIC)
            .returns(PropertyKind::Float64)
            .build_with(layout);

        assert!(function.is_static());
        assert!(!function.flags.contains(FunctionFlags::HAS_OUT_PARMS));
        assert_eq!(function.qualified_name(), "Math::Pi");
    }

    #[test]
    fn test_find_param_reports_index() {
        let function = FunctionDescriptor::builder("Player", "Add")
            .param("a", PropertyKind::Int32)
            .param("b", PropertyKind::Int32)
            .build_with(layout);

        assert_eq!(function.find_param("b").map(|(index, _)| index), Some(1));
        assert!(function.find_param("c").is_none());
    }

    #[test]
    fn test_container_ptr() {
        let function = FunctionDescriptor::builder("Player", "Add")
            .param("a", PropertyKind::Int32)
            .param("b", PropertyKind::Int64)
            .build_with(layout);

        let mut block = [0u64; 2];
        let base = block.as_mut_ptr() as *mut u8;
        unsafe {
            assert_eq!(function.params[1].container_ptr(base), base.add(8));
        }
    }
}

mod foreign_method_tests {
    use super::*;

    #[test]
    fn test_parameter_count_excludes_return() {
        let method = ForeignMethodDescriptor::new("Game", MethodSignature::parse("Game.Player:Add (int,int)").unwrap())
            .arg("b")
            .arg("a")
            .returns();

        assert_eq!(method.arguments.len(), 3);
        assert_eq!(method.parameter_count(), 2);
        assert_eq!(method.name(), "Add");
        assert!(method.arguments[2].is_return_value());
    }

    #[test]
    fn test_ref_argument() {
        let method = ForeignMethodDescriptor::new("Game", MethodSignature::parse("Game.Player:Scale (int&,int)").unwrap())
            .ref_arg("y")
            .arg("x");

        assert!(method.arguments[0].is_pass_by_reference());
        assert!(!method.arguments[1].is_pass_by_reference());
    }
}
