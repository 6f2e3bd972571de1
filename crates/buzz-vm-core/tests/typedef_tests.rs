//! TypeDef canonicalization and equality rules.

use buzz_vm_core::typedef;
use buzz_vm_core::{Heap, ParameterDef, TypeKind};

#[test]
fn structural_types_are_canonicalized() {
    let heap = Heap::new();
    let num_a = heap.type_basic(TypeKind::Number, false);
    let num_b = heap.type_basic(TypeKind::Number, false);
    assert!(num_a.ptr_eq(&num_b));

    let list_a = heap.type_list(num_a, false);
    let list_b = heap.type_list(num_b, false);
    assert!(list_a.ptr_eq(&list_b));

    let nested_a = heap.type_list(list_a, false);
    let nested_b = heap.type_list(list_b, false);
    assert!(nested_a.ptr_eq(&nested_b));
}

#[test]
fn optionality_distinguishes_canonical_entries() {
    let heap = Heap::new();
    let num = heap.type_basic(TypeKind::Number, false);
    let num_opt = heap.type_basic(TypeKind::Number, true);
    assert!(!num.ptr_eq(&num_opt));
    assert!(!typedef::eql(&num, &num_opt));
}

#[test]
fn map_types_compare_key_and_value() {
    let heap = Heap::new();
    let num = heap.type_basic(TypeKind::Number, false);
    let str_ty = heap.type_basic(TypeKind::String, false);
    let a = heap.type_map(str_ty, num, false);
    let b = heap.type_map(str_ty, num, false);
    let c = heap.type_map(num, str_ty, false);
    assert!(typedef::eql(&a, &b));
    assert!(a.ptr_eq(&b));
    assert!(!typedef::eql(&a, &c));
}

#[test]
fn function_signatures_ignore_parameter_names() {
    let heap = Heap::new();
    let num = heap.type_basic(TypeKind::Number, false);
    let void = heap.type_basic(TypeKind::Void, false);

    let first = heap.type_function(
        vec![ParameterDef {
            name: "x".into(),
            type_def: num,
            has_default: false,
        }],
        num,
        void,
    );
    let second = heap.type_function(
        vec![ParameterDef {
            name: "totally_different".into(),
            type_def: num,
            has_default: false,
        }],
        num,
        void,
    );
    assert!(typedef::eql(&first, &second));

    // Arity differences do matter.
    let third = heap.type_function(vec![], num, void);
    assert!(!typedef::eql(&first, &third));
}

#[test]
fn nominal_definitions_never_collapse() {
    let heap = Heap::new();
    let name = heap.intern("Point");
    let first = heap.alloc_object(name, None);
    let second = heap.alloc_object(name, None);

    let first_ty = first.as_object().unwrap().type_def.get().unwrap();
    let second_ty = second.as_object().unwrap().type_def.get().unwrap();
    assert!(!first_ty.ptr_eq(&second_ty));
    assert!(!typedef::eql(&first_ty, &second_ty));
    // Each definition is equal to itself.
    assert!(typedef::eql(&first_ty, &first_ty));
}

#[test]
fn equality_is_transitive_for_resolved_types() {
    let heap = Heap::new();
    let num = heap.type_basic(TypeKind::Number, false);
    let a = heap.type_list(num, false);
    let b = heap.type_list(heap.type_basic(TypeKind::Number, false), false);
    let c = heap.type_list(num, false);
    assert!(typedef::eql(&a, &b));
    assert!(typedef::eql(&b, &c));
    assert!(typedef::eql(&a, &c));
}

#[test]
fn placeholders_are_loosely_equal_to_anything() {
    let heap = Heap::new();
    let placeholder = heap.placeholder_type(
        Some("T".into()),
        buzz_vm_core::SourceLocation::new("test.buzz", 1, 1),
    );
    let num = heap.type_basic(TypeKind::Number, false);
    let str_ty = heap.type_basic(TypeKind::String, true);
    assert!(typedef::eql(&placeholder, &num));
    assert!(typedef::eql(&str_ty, &placeholder));
}

#[test]
fn void_is_assignable_to_optionals_but_not_equal() {
    let heap = Heap::new();
    let void = heap.type_basic(TypeKind::Void, false);
    let num_opt = heap.type_basic(TypeKind::Number, true);
    let num = heap.type_basic(TypeKind::Number, false);

    // The permissive direction is assignability only.
    assert!(typedef::assignable_to(&void, &num_opt));
    assert!(!typedef::eql(&void, &num_opt));

    // A non-optional is not assignable to the optional of the same shape.
    assert!(!typedef::assignable_to(&num, &num_opt));
    // And assignability coincides with equality elsewhere.
    assert!(typedef::assignable_to(&num, &num));
}

#[test]
fn fiber_types_compare_return_and_yield() {
    let heap = Heap::new();
    let num = heap.type_basic(TypeKind::Number, false);
    let str_ty = heap.type_basic(TypeKind::String, false);
    let a = heap.type_fiber(num, str_ty);
    let b = heap.type_fiber(num, str_ty);
    let c = heap.type_fiber(str_ty, num);
    assert!(a.ptr_eq(&b));
    assert!(!typedef::eql(&a, &c));
}

#[test]
fn member_defs_are_built_and_cached() {
    use buzz_vm_core::members;

    let heap = Heap::new();
    let num = heap.type_basic(TypeKind::Number, false);
    let list_ty = heap.type_list(num, false);
    let append = heap.intern("append");

    let def_a = members::member_def(&heap, list_ty, append).unwrap();
    let def_b = members::member_def(&heap, list_ty, append).unwrap();
    assert!(def_a.ptr_eq(&def_b));
    assert_eq!(def_a.as_type().unwrap().kind(), TypeKind::Function);

    // append: (item) -> the receiver list type itself
    match &def_a.as_type().unwrap().data().payload {
        Some(buzz_vm_core::TypeUnion::Function {
            parameters,
            return_type,
            ..
        }) => {
            assert_eq!(parameters.len(), 1);
            assert!(parameters[0].type_def.ptr_eq(&num));
            assert!(return_type.ptr_eq(&list_ty));
        }
        other => panic!("expected function payload, got {other:?}"),
    }

    let unknown = heap.intern("frobnicate");
    assert!(members::member_def(&heap, list_ty, unknown).is_none());
}
