use gcbridge::sandbox::{Sandbox, GAME_ASSEMBLY};
use gcbridge::{
    ArgumentStack, ForeignException, ForeignMethodDescriptor, FunctionDescriptor, FunctionRedirector, HostObject,
    MethodSignature, PropertyKind,
};
use proptest::prelude::*;
use std::cell::RefCell;
use std::ptr;
use std::rc::Rc;

fn actor(sandbox: &Sandbox) -> HostObject {
    let class = sandbox.define_bound_class("Game.Actor", None);
    sandbox.spawn(class, "Actor_0")
}

fn foreign(key: &str) -> ForeignMethodDescriptor {
    ForeignMethodDescriptor::new(GAME_ASSEMBLY, MethodSignature::parse(key).unwrap())
}

/// `Actor::{name}(x: int, out y: int)`, foreign side declared `(int,int&)`
fn int_to_out(sandbox: &Sandbox, name: &str) -> Rc<FunctionRedirector> {
    let function = FunctionDescriptor::builder("Actor", name)
        .param("x", PropertyKind::Int32)
        .out_param("y", PropertyKind::Int32)
        .build(sandbox.host.as_ref());
    let key = format!("Game.Actor:{name} (int,int&)");
    sandbox.cx.redirect(function, foreign(&key).arg("x").ref_arg("y"))
}

#[test]
fn test_identity_stability() {
    let sandbox = Sandbox::new().unwrap();
    let class = sandbox.define_bound_class("Game.Actor", None);
    let first = sandbox.spawn(class, "Actor_0");
    let second = sandbox.spawn(class, "Actor_1");

    let proxy = sandbox.cx.get_foreign_object(first).unwrap();
    assert_eq!(sandbox.cx.get_foreign_object(first).unwrap(), proxy);
    assert_ne!(sandbox.cx.get_foreign_object(second).unwrap(), proxy);
    assert_eq!(sandbox.cx.get_host_object(proxy), Some(first));
}

#[test]
fn test_gc_severance() {
    let sandbox = Sandbox::new().unwrap();
    let object = actor(&sandbox);
    let proxy = sandbox.cx.get_foreign_object(object).unwrap();

    sandbox.host.mark_unreachable(object);
    let report = sandbox.cx.on_reachability_pass();

    assert_eq!(report.severed, 1);
    assert_eq!(sandbox.cx.get_host_object(proxy), None);
    assert!(!sandbox.cx.table().contains(object));
}

#[test]
fn test_reference_write_back_under_reorder() {
    let sandbox = Sandbox::new().unwrap();
    let object = actor(&sandbox);
    sandbox
        .foreign
        .define_method(GAME_ASSEMBLY, "Game.Actor:Scale (int&,int)", |call| unsafe {
            let x = call.read::<i32>(1);
            call.write(0, x * 2);
            Ok(None)
        });
    let function = FunctionDescriptor::builder("Actor", "Scale")
        .param("x", PropertyKind::Int32)
        .out_param("y", PropertyKind::Int32)
        .build(sandbox.host.as_ref());
    let scale = sandbox
        .cx
        .redirect(function, foreign("Game.Actor:Scale (int&,int)").ref_arg("y").arg("x"));

    let x = 5i32;
    let mut y = 0i32;
    let mut stack = ArgumentStack::new().value(&x).reference(&mut y);
    unsafe { scale.invoke(&sandbox.cx, Some(object), &mut stack, ptr::null_mut()) }.unwrap();

    assert_eq!(y, 10);
    assert_eq!(x, 5);
}

#[test]
fn test_name_based_linking_under_reorder() {
    let sandbox = Sandbox::new().unwrap();
    let object = actor(&sandbox);
    sandbox
        .foreign
        .define_method(GAME_ASSEMBLY, "Game.Actor:Add (int,int)", |call| {
            let (b, a) = unsafe { (call.read::<i32>(0), call.read::<i32>(1)) };
            Ok(Some(call.runtime().box_value(a + b)))
        });
    let function = FunctionDescriptor::builder("Actor", "Add")
        .param("a", PropertyKind::Int32)
        .param("b", PropertyKind::Int32)
        .returns(PropertyKind::Int32)
        .build(sandbox.host.as_ref());
    let add = sandbox
        .cx
        .redirect(function, foreign("Game.Actor:Add (int,int)").arg("b").arg("a").returns());

    let (a, b) = (3i32, 4i32);
    let mut sum = 0i32;
    let mut stack = ArgumentStack::new().value(&a).value(&b);
    unsafe {
        add.invoke(&sandbox.cx, Some(object), &mut stack, &mut sum as *mut i32 as *mut u8)
            .unwrap();
    }
    assert_eq!(sum, 7);
}

#[test]
fn test_enum_width_exact_through_call() {
    let sandbox = Sandbox::new().unwrap();
    let object = actor(&sandbox);
    sandbox
        .foreign
        .define_method(GAME_ASSEMBLY, "Game.Actor:Narrow (Mode&)", |call| unsafe {
            call.write(0, 0x1234u16);
            Ok(None)
        });
    sandbox
        .foreign
        .define_method(GAME_ASSEMBLY, "Game.Actor:Wide (Flags&)", |call| unsafe {
            call.write(0, 0x0123_4567_89AB_CDEFu64);
            Ok(None)
        });

    let narrow = sandbox.cx.redirect(
        FunctionDescriptor::builder("Actor", "Narrow")
            .out_param("mode", PropertyKind::Enum { width: 2 })
            .build(sandbox.host.as_ref()),
        foreign("Game.Actor:Narrow (Mode&)").ref_arg("mode"),
    );
    let wide = sandbox.cx.redirect(
        FunctionDescriptor::builder("Actor", "Wide")
            .out_param("flags", PropertyKind::Enum { width: 8 })
            .build(sandbox.host.as_ref()),
        foreign("Game.Actor:Wide (Flags&)").ref_arg("flags"),
    );

    let mut mode = [0xFFFFu16, 0xBEEF];
    let mut stack = ArgumentStack::new().reference(&mut mode[0]);
    unsafe { narrow.invoke(&sandbox.cx, Some(object), &mut stack, ptr::null_mut()) }.unwrap();
    assert_eq!(mode, [0x1234, 0xBEEF]);

    let mut flags = 0u64;
    let mut stack = ArgumentStack::new().reference(&mut flags);
    unsafe { wide.invoke(&sandbox.cx, Some(object), &mut stack, ptr::null_mut()) }.unwrap();
    assert_eq!(flags, 0x0123_4567_89AB_CDEF);
}

#[test]
fn test_reentrant_calls_keep_frames_apart() {
    let sandbox = Sandbox::new().unwrap();
    let object = actor(&sandbox);
    let outer = int_to_out(&sandbox, "Outer");
    let inner = int_to_out(&sandbox, "Triple");

    sandbox
        .foreign
        .define_method(GAME_ASSEMBLY, "Game.Actor:Triple (int,int&)", |call| unsafe {
            let x = call.read::<i32>(0);
            call.write(1, x * 3);
            Ok(None)
        });

    let observed = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&observed);
    let cx = Rc::downgrade(&sandbox.cx);
    let (outer_view, nested) = (Rc::clone(&outer), Rc::clone(&inner));
    sandbox
        .foreign
        .define_method(GAME_ASSEMBLY, "Game.Actor:Outer (int,int&)", move |call| unsafe {
            let cx = cx.upgrade().expect("bridge dropped during call");
            let before = call.read::<i32>(0);
            let target = call.instance().and_then(|proxy| cx.get_host_object(proxy));

            let x = 100i32;
            let mut y = -100i32;
            let mut stack = ArgumentStack::new().value(&x).reference(&mut y);
            nested
                .invoke(&cx, target, &mut stack, ptr::null_mut())
                .map_err(|error| ForeignException::new(error.to_string(), ""))?;

            log.borrow_mut()
                .push((before, call.read::<i32>(0), x, y, outer_view.depth(), nested.depth()));
            call.write(1, before + y);
            Ok(None)
        });

    let x = 1i32;
    let mut y = -1i32;
    let mut stack = ArgumentStack::new().value(&x).reference(&mut y);
    unsafe { outer.invoke(&sandbox.cx, Some(object), &mut stack, ptr::null_mut()) }.unwrap();

    assert_eq!(y, 301);
    assert_eq!(*observed.borrow(), vec![(1, 1, 100, 300, 1, 0)]);
    assert_eq!(outer.depth(), 0);
    assert_eq!(sandbox.cx.table().len(), 1);
}

#[test]
fn test_call_after_foreign_exception() {
    let sandbox = Sandbox::new().unwrap();
    let object = actor(&sandbox);
    let checked = int_to_out(&sandbox, "Checked");
    sandbox
        .foreign
        .define_method(GAME_ASSEMBLY, "Game.Actor:Checked (int,int&)", |call| unsafe {
            let x = call.read::<i32>(0);
            if x < 0 {
                return Err(ForeignException::new("ArgumentException: x", "at Game.Actor.Checked"));
            }
            call.write(1, x + 1);
            Ok(None)
        });

    let mut y = 0i32;
    let negative = -3i32;
    let mut stack = ArgumentStack::new().value(&negative).reference(&mut y);
    let error = unsafe { checked.invoke(&sandbox.cx, Some(object), &mut stack, ptr::null_mut()) }.unwrap_err();
    assert!(!error.is_fatal());
    assert_eq!(y, 0);

    let positive = 41i32;
    let mut stack = ArgumentStack::new().value(&positive).reference(&mut y);
    unsafe { checked.invoke(&sandbox.cx, Some(object), &mut stack, ptr::null_mut()) }.unwrap();
    assert_eq!(y, 42);
}

proptest! {
    #[test]
    fn prop_scalars_cross_a_call_unchanged(int in any::<i64>(), float in any::<f64>()) {
        let sandbox = Sandbox::new().unwrap();
        let object = actor(&sandbox);
        sandbox
            .foreign
            .define_method(GAME_ASSEMBLY, "Game.Actor:Echo (long,double,long&,double&)", |call| unsafe {
                call.write(2, call.read::<i64>(0));
                call.write(3, call.read::<f64>(1));
                Ok(None)
            });
        let function = FunctionDescriptor::builder("Actor", "Echo")
            .param("int", PropertyKind::Int64)
            .param("float", PropertyKind::Float64)
            .out_param("int_out", PropertyKind::Int64)
            .out_param("float_out", PropertyKind::Float64)
            .build(sandbox.host.as_ref());
        let echo = sandbox.cx.redirect(
            function,
            foreign("Game.Actor:Echo (long,double,long&,double&)")
                .arg("int")
                .arg("float")
                .ref_arg("int_out")
                .ref_arg("float_out"),
        );

        let mut int_out = 0i64;
        let mut float_out = 0f64;
        let mut stack = ArgumentStack::new()
            .value(&int)
            .value(&float)
            .reference(&mut int_out)
            .reference(&mut float_out);
        unsafe { echo.invoke(&sandbox.cx, Some(object), &mut stack, ptr::null_mut()) }.unwrap();

        prop_assert_eq!(int_out, int);
        prop_assert_eq!(float_out.to_bits(), float.to_bits());
    }
}
