//! Placeholder resolution: forward references recorded during parsing are
//! substituted when the real definition appears, and their dependents are
//! re-evaluated transitively.

mod common;

use std::rc::Rc;

use buzz_vm_bytecode::{Constant, FunctionKind, Op};
use buzz_vm_core::{
    Heap, PlaceholderRelation, SourceLocation, TypeKind, Value, Vm, VmError,
};
use common::{function, script};

fn here(line: u32) -> SourceLocation {
    SourceLocation::new("test.buzz", line, 1)
}

#[test]
fn link_is_first_edge_wins() {
    let heap = Heap::new();
    let a = heap.placeholder_type(Some("A".into()), here(1));
    let b = heap.placeholder_type(Some("B".into()), here(2));
    let c = heap.placeholder_type(Some("C".into()), here(3));

    heap.link_placeholders(a, c, PlaceholderRelation::Call);
    // Second parent is ignored: the first edge wins.
    heap.link_placeholders(b, c, PlaceholderRelation::FieldAccess);

    let c_ty = c.as_type().unwrap();
    let parent = c_ty.with_placeholder(|p| p.parent.get()).unwrap().unwrap();
    assert!(parent.ptr_eq(&a));
    let relation = c_ty
        .with_placeholder(|p| p.parent_relation.get())
        .unwrap()
        .unwrap();
    assert_eq!(relation, PlaceholderRelation::Call);
}

#[test]
fn self_link_is_a_no_op() {
    let heap = Heap::new();
    let a = heap.placeholder_type(Some("A".into()), here(1));
    heap.link_placeholders(a, a, PlaceholderRelation::Optional);

    let a_ty = a.as_type().unwrap();
    assert!(a_ty.with_placeholder(|p| p.parent.get()).unwrap().is_none());
    assert_eq!(
        a_ty.with_placeholder(|p| p.children.borrow().len())
            .unwrap(),
        0
    );
}

#[test]
fn parent_chains_are_finite() {
    // Children are created from their parents during parsing, so walking
    // parents terminates.
    let heap = Heap::new();
    let root = heap.placeholder_type(Some("root".into()), here(1));
    let mut previous = root;
    for i in 0..10 {
        let child = heap.placeholder_type(Some(format!("c{i}")), here(i + 2));
        heap.link_placeholders(previous, child, PlaceholderRelation::FieldAccess);
        previous = child;
    }

    let mut steps = 0;
    let mut cursor = Some(previous);
    while let Some(current) = cursor {
        cursor = current
            .as_type()
            .unwrap()
            .with_placeholder(|p| p.parent.get())
            .flatten();
        steps += 1;
        assert!(steps <= 11, "parent chain does not terminate");
    }
    assert_eq!(steps, 11);
}

#[test]
fn resolving_substitutes_in_place_for_every_holder() {
    let heap = Heap::new();
    let placeholder = heap.placeholder_type(Some("Thing".into()), here(1));

    // Another structural type already refers to the placeholder.
    let list_of_placeholder = heap.type_list(placeholder, false);

    let resolved = heap.type_basic(TypeKind::Number, false);
    heap.resolve_placeholder(placeholder, resolved).unwrap();

    // The placeholder object itself became the resolved type, so the list
    // payload sees the substitution without being touched.
    assert_eq!(placeholder.as_type().unwrap().kind(), TypeKind::Number);
    let item_kind = match &list_of_placeholder.as_type().unwrap().data().payload {
        Some(buzz_vm_core::TypeUnion::List { item }) => item.as_type().unwrap().kind(),
        _ => panic!("expected list payload"),
    };
    assert_eq!(item_kind, TypeKind::Number);
}

#[test]
fn call_children_become_the_return_type() {
    let heap = Heap::new();
    let callee = heap.placeholder_type(Some("f".into()), here(1));
    let result = heap.placeholder_type(None, here(1));
    heap.link_placeholders(callee, result, PlaceholderRelation::Call);

    let str_ty = heap.type_basic(TypeKind::String, false);
    let void = heap.type_basic(TypeKind::Void, false);
    let signature = heap.type_function(vec![], str_ty, void);
    heap.resolve_placeholder(callee, signature).unwrap();

    assert_eq!(result.as_type().unwrap().kind(), TypeKind::String);
    heap.ensure_resolved().unwrap();
}

#[test]
fn optional_children_clone_the_optional_form() {
    let heap = Heap::new();
    let base = heap.placeholder_type(Some("T".into()), here(1));
    let optional = heap.placeholder_type(None, here(1));
    heap.link_placeholders(base, optional, PlaceholderRelation::Optional);

    let num = heap.type_basic(TypeKind::Number, false);
    heap.resolve_placeholder(base, num).unwrap();

    let ty = optional.as_type().unwrap();
    assert_eq!(ty.kind(), TypeKind::Number);
    assert!(ty.optional());
}

#[test]
fn unresolved_placeholder_is_a_compile_error_naming_the_location() {
    let heap = Heap::new();
    let _ = heap.placeholder_type(Some("Ghost".into()), here(41));

    match heap.ensure_resolved() {
        Err(VmError::Compile { message, location }) => {
            assert!(message.contains("Ghost"));
            assert_eq!(location.line, 41);
            assert_eq!(location.file, "test.buzz");
        }
        other => panic!("expected compile error, got {other:?}"),
    }
}

#[test]
fn forward_reference_to_a_class_compiles_and_runs() {
    // fun f() > X { return X().y; }  object X { str y = "ok"; }
    // The parser meets X first as a forward reference; once the object
    // definition appears the placeholder resolves and f() returns "ok".
    let mut vm = Vm::new();
    let heap = vm.heap();

    // Parsing `f`: X is unknown, record placeholders.
    let x_placeholder = heap.placeholder_type(Some("X".into()), here(1));
    let instance_placeholder = heap.placeholder_type(None, here(1));
    heap.link_placeholders(
        x_placeholder,
        instance_placeholder,
        PlaceholderRelation::Instance,
    );
    let y_placeholder = heap.placeholder_type(Some("y".into()), here(1));
    heap.link_placeholders(
        instance_placeholder,
        y_placeholder,
        PlaceholderRelation::FieldAccess,
    );

    // Parsing `object X`: build the definition and resolve.
    let name = heap.intern("X");
    let class = heap.alloc_object(name, None);
    let y_name = heap.intern("y");
    let ok = heap.string_value("ok");
    heap.object_set_field_default(class, y_name, ok);
    let str_ty = heap.type_basic(TypeKind::String, false);
    heap.object_set_member_type(class, y_name, str_ty);

    let class_type = class.as_object().unwrap().type_def.get().unwrap();
    heap.resolve_placeholder(x_placeholder, class_type).unwrap();
    vm.finish_compilation().unwrap();

    // The FieldAccess chain resolved to `str`.
    assert_eq!(y_placeholder.as_type().unwrap().kind(), TypeKind::String);

    // And the program itself runs: f() == "ok".
    let x_slot = vm.heap().define_global("X");
    vm.heap().set_global(x_slot, Value::Obj(class));

    let f = function("f", 0, FunctionKind::Function, move |chunk| {
        let y = chunk.add_constant(Constant::String("y".into()));
        chunk.emit(Op::GetGlobal(x_slot), 1);
        chunk.emit(Op::NewInstance, 1);
        chunk.emit(Op::GetField(y), 1);
        chunk.emit(Op::Return, 1);
    });
    let f_obj = vm.heap().alloc_function(Rc::new(f), None);
    let f_closure = vm.heap().alloc_closure(f_obj, vec![]);

    let result = vm.call(Value::Obj(f_closure), vec![]).unwrap();
    let obj = result.as_obj().unwrap();
    assert_eq!(obj.as_string().unwrap().as_str(), "ok");
}

#[test]
fn subtype_dispatch_walks_the_super_chain() {
    // object A { fun m() > str { return "a"; } }
    // object B < A { fun m() > str { return "b"; } }
    // A-typed B instance dispatches to B.m.
    let mut vm = Vm::new();
    let heap = vm.heap();

    let a_name = heap.intern("A");
    let a = heap.alloc_object(a_name, None);
    let b_name = heap.intern("B");
    let b = heap.alloc_object(b_name, Some(a));
    let m_name = heap.intern("m");

    let method = |text: &str| {
        let text = text.to_string();
        function("m", 0, FunctionKind::Method, move |chunk| {
            let result = chunk.add_constant(Constant::String(text.clone()));
            chunk.emit(Op::Constant(result), 1);
            chunk.emit(Op::Return, 1);
        })
    };
    let a_m = heap.alloc_function(Rc::new(method("a")), None);
    let a_m = heap.alloc_closure(a_m, vec![]);
    heap.object_set_method(a, m_name, Value::Obj(a_m));
    let b_m = heap.alloc_function(Rc::new(method("b")), None);
    let b_m = heap.alloc_closure(b_m, vec![]);
    heap.object_set_method(b, m_name, Value::Obj(b_m));

    let instance = heap.alloc_instance(b);
    let slot = heap.define_global("a");
    heap.set_global(slot, Value::Obj(instance));

    // The instance satisfies `is A` through the super chain.
    let a_type = a.as_object().unwrap().type_def.get().unwrap();
    let a_instance_type = heap.type_instance_of(a, false);
    assert!(buzz_vm_core::object::value_is_type(
        &Value::Obj(instance),
        &a_instance_type
    ));
    let _ = a_type;

    let result = vm
        .interpret(script(move |chunk| {
            let m = chunk.add_constant(Constant::String("m".into()));
            chunk.emit(Op::GetGlobal(slot), 1);
            chunk.emit(Op::Invoke(m, 0), 1);
            chunk.emit(Op::Return, 1);
        }))
        .unwrap();
    let obj = result.as_obj().unwrap();
    assert_eq!(obj.as_string().unwrap().as_str(), "b");
}
