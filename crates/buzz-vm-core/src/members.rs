//! Built-in member tables
//!
//! Strings, lists, maps, patterns, and fibers carry native methods that are
//! materialized lazily: `member` checks a per-kind cache keyed by interned
//! name and, on a miss, looks the name up in a static dispatch table and
//! caches a freshly allocated `Native` wrapper. `member_def` is the
//! compile-time counterpart: it builds (and caches) the member's declared
//! signature through the type registry.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::RuntimeErrorKind;
use crate::heap::Heap;
use crate::object::{NativeFn, ObjKind, ObjRef};
use crate::typedef::{ParameterDef, TypeKind, TypeUnion};
use crate::value::{HashableValue, Value};
use crate::vm::Vm;

/// Resolve a built-in member: cache hit, or static-table lookup plus a new
/// `Native` wrapper.
pub fn member(heap: &Heap, kind: ObjKind, name: ObjRef) -> Option<ObjRef> {
    if let Some(hit) = heap.cached_member(kind, name) {
        return Some(hit);
    }
    let function = {
        let name_str = name.as_string()?.as_str();
        lookup_native(kind, name_str)?
    };
    let native = {
        let name_str = name.as_string()?.as_str();
        heap.alloc_native(name_str, function)
    };
    heap.cache_member(kind, name, native);
    Some(native)
}

/// Static dispatch table: member name → native function, per receiver kind.
pub fn lookup_native(kind: ObjKind, name: &str) -> Option<NativeFn> {
    match kind {
        ObjKind::String => string_native(name),
        ObjKind::List => list_native(name),
        ObjKind::Map => map_native(name),
        ObjKind::Pattern => pattern_native(name),
        ObjKind::Fiber => fiber_native(name),
        _ => None,
    }
}

fn string_native(name: &str) -> Option<NativeFn> {
    Some(match name {
        "len" => string_len,
        "byte" => string_byte,
        "indexOf" => string_index_of,
        "startsWith" => string_starts_with,
        "endsWith" => string_ends_with,
        "replace" => string_replace,
        "sub" => string_sub,
        "split" => string_split,
        "repeat" => string_repeat,
        "upper" => string_upper,
        "lower" => string_lower,
        "trim" => string_trim,
        "encodeBase64" => string_encode_base64,
        "decodeBase64" => string_decode_base64,
        _ => return None,
    })
}

fn list_native(name: &str) -> Option<NativeFn> {
    Some(match name {
        "append" => list_append,
        "len" => list_len,
        "remove" => list_remove,
        "sub" => list_sub,
        "indexOf" => list_index_of,
        "join" => list_join,
        "next" => list_next,
        _ => return None,
    })
}

fn map_native(name: &str) -> Option<NativeFn> {
    Some(match name {
        "size" => map_size,
        "remove" => map_remove,
        "keys" => map_keys,
        "values" => map_values,
        "rawNext" => map_raw_next,
        _ => return None,
    })
}

fn pattern_native(name: &str) -> Option<NativeFn> {
    Some(match name {
        "match" => pattern_match,
        "matchAll" => pattern_match_all,
        _ => return None,
    })
}

fn fiber_native(name: &str) -> Option<NativeFn> {
    Some(match name {
        "over" => fiber_over,
        "cancel" => fiber_cancel,
        "isMain" => fiber_is_main,
        _ => return None,
    })
}

// =============================================================================
// Receiver helpers
// =============================================================================

fn receiver_obj(vm: &mut Vm, kind: ObjKind) -> Result<ObjRef, i32> {
    match vm.native_receiver().as_obj_kind(kind) {
        Some(obj) => Ok(obj),
        None => Err(vm.native_error(RuntimeErrorKind::Custom, "wrong receiver kind")),
    }
}

fn string_arg(vm: &mut Vm, index: usize) -> Result<String, i32> {
    let text = vm
        .native_arg(index)
        .and_then(|v| v.as_obj_kind(ObjKind::String))
        .map(|obj| obj.as_string().expect("string").as_str().to_string());
    match text {
        Some(text) => Ok(text),
        None => Err(vm.native_error(RuntimeErrorKind::Custom, "argument must be a string")),
    }
}

fn integer_arg(vm: &mut Vm, index: usize) -> Result<i64, i32> {
    match vm.native_arg(index).and_then(|v| v.as_integer()) {
        Some(n) => Ok(n),
        None => Err(vm.native_error(RuntimeErrorKind::BadNumber, "argument must be an integer")),
    }
}

/// `sub(start, len?)` bounds shared by strings and lists: a start past the
/// end is an error, the length is clamped.
fn sub_range(vm: &mut Vm, total: usize) -> Result<(usize, usize), i32> {
    let start = integer_arg(vm, 0)?;
    let start = match usize::try_from(start) {
        Ok(start) if start <= total => start,
        _ => {
            return Err(
                vm.native_error(RuntimeErrorKind::OutOfBound, "`start` is out of bound")
            )
        }
    };
    let end = match vm.native_arg(1) {
        None | Some(Value::Null) => total,
        Some(_) => {
            let len = integer_arg(vm, 1)?;
            match usize::try_from(len) {
                Ok(len) => (start + len).min(total),
                Err(_) => {
                    return Err(
                        vm.native_error(RuntimeErrorKind::OutOfBound, "`len` is out of bound")
                    )
                }
            }
        }
    };
    Ok((start, end))
}

// =============================================================================
// String members
// =============================================================================

fn string_text(vm: &mut Vm) -> Result<String, i32> {
    let obj = receiver_obj(vm, ObjKind::String)?;
    Ok(obj.as_string().expect("string").as_str().to_string())
}

fn string_len(vm: &mut Vm) -> i32 {
    match string_text(vm) {
        Ok(text) => {
            vm.push(Value::Integer(text.len() as i64));
            1
        }
        Err(status) => status,
    }
}

fn string_byte(vm: &mut Vm) -> i32 {
    let text = match string_text(vm) {
        Ok(text) => text,
        Err(status) => return status,
    };
    let index = match integer_arg(vm, 0) {
        Ok(index) => index,
        Err(status) => return status,
    };
    match usize::try_from(index).ok().and_then(|i| text.as_bytes().get(i).copied()) {
        Some(byte) => {
            vm.push(Value::Integer(byte as i64));
            1
        }
        None => vm.native_error(RuntimeErrorKind::OutOfBound, "`at` is out of bound"),
    }
}

fn string_index_of(vm: &mut Vm) -> i32 {
    let text = match string_text(vm) {
        Ok(text) => text,
        Err(status) => return status,
    };
    let needle = match string_arg(vm, 0) {
        Ok(needle) => needle,
        Err(status) => return status,
    };
    match text.find(&needle) {
        Some(position) => vm.push(Value::Integer(position as i64)),
        None => vm.push(Value::Null),
    }
    1
}

fn string_starts_with(vm: &mut Vm) -> i32 {
    let text = match string_text(vm) {
        Ok(text) => text,
        Err(status) => return status,
    };
    let prefix = match string_arg(vm, 0) {
        Ok(prefix) => prefix,
        Err(status) => return status,
    };
    vm.push(Value::Boolean(text.starts_with(&prefix)));
    1
}

fn string_ends_with(vm: &mut Vm) -> i32 {
    let text = match string_text(vm) {
        Ok(text) => text,
        Err(status) => return status,
    };
    let suffix = match string_arg(vm, 0) {
        Ok(suffix) => suffix,
        Err(status) => return status,
    };
    vm.push(Value::Boolean(text.ends_with(&suffix)));
    1
}

fn string_replace(vm: &mut Vm) -> i32 {
    let text = match string_text(vm) {
        Ok(text) => text,
        Err(status) => return status,
    };
    let old = match string_arg(vm, 0) {
        Ok(old) => old,
        Err(status) => return status,
    };
    let new = match string_arg(vm, 1) {
        Ok(new) => new,
        Err(status) => return status,
    };
    let replaced = text.replace(&old, &new);
    let value = vm.heap().string_value(&replaced);
    vm.push(value);
    1
}

fn string_sub(vm: &mut Vm) -> i32 {
    let text = match string_text(vm) {
        Ok(text) => text,
        Err(status) => return status,
    };
    let chars: Vec<char> = text.chars().collect();
    let (start, end) = match sub_range(vm, chars.len()) {
        Ok(range) => range,
        Err(status) => return status,
    };
    let sub: String = chars[start..end].iter().collect();
    let value = vm.heap().string_value(&sub);
    vm.push(value);
    1
}

fn string_split(vm: &mut Vm) -> i32 {
    let text = match string_text(vm) {
        Ok(text) => text,
        Err(status) => return status,
    };
    let separator = match string_arg(vm, 0) {
        Ok(separator) => separator,
        Err(status) => return status,
    };
    let parts: Vec<Value> = if separator.is_empty() {
        text.chars()
            .map(|c| vm.heap().string_value(&c.to_string()))
            .collect()
    } else {
        text.split(&separator)
            .map(|part| vm.heap().string_value(part))
            .collect()
    };
    let item_type = vm.heap().type_basic(TypeKind::String, false);
    let list = vm.heap().alloc_list(parts, item_type);
    vm.push(Value::Obj(list));
    1
}

fn string_repeat(vm: &mut Vm) -> i32 {
    let text = match string_text(vm) {
        Ok(text) => text,
        Err(status) => return status,
    };
    let count = match integer_arg(vm, 0) {
        Ok(count) => count,
        Err(status) => return status,
    };
    let Ok(count) = usize::try_from(count) else {
        return vm.native_error(RuntimeErrorKind::BadNumber, "`n` must not be negative");
    };
    let value = vm.heap().string_value(&text.repeat(count));
    vm.push(value);
    1
}

fn string_upper(vm: &mut Vm) -> i32 {
    match string_text(vm) {
        Ok(text) => {
            let value = vm.heap().string_value(&text.to_uppercase());
            vm.push(value);
            1
        }
        Err(status) => status,
    }
}

fn string_lower(vm: &mut Vm) -> i32 {
    match string_text(vm) {
        Ok(text) => {
            let value = vm.heap().string_value(&text.to_lowercase());
            vm.push(value);
            1
        }
        Err(status) => status,
    }
}

fn string_trim(vm: &mut Vm) -> i32 {
    match string_text(vm) {
        Ok(text) => {
            let value = vm.heap().string_value(text.trim());
            vm.push(value);
            1
        }
        Err(status) => status,
    }
}

fn string_encode_base64(vm: &mut Vm) -> i32 {
    match string_text(vm) {
        Ok(text) => {
            let encoded = BASE64.encode(text.as_bytes());
            let value = vm.heap().string_value(&encoded);
            vm.push(value);
            1
        }
        Err(status) => status,
    }
}

fn string_decode_base64(vm: &mut Vm) -> i32 {
    let text = match string_text(vm) {
        Ok(text) => text,
        Err(status) => return status,
    };
    let decoded = BASE64
        .decode(text.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    match decoded {
        Some(decoded) => {
            let value = vm.heap().string_value(&decoded);
            vm.push(value);
            1
        }
        None => vm.native_error(RuntimeErrorKind::Custom, "could not decode base64"),
    }
}

// =============================================================================
// List members
// =============================================================================

fn list_append(vm: &mut Vm) -> i32 {
    let list = match receiver_obj(vm, ObjKind::List) {
        Ok(list) => list,
        Err(status) => return status,
    };
    let value = vm.native_arg(0).unwrap_or(Value::Null);
    vm.heap().list_append(list, value);
    vm.push(Value::Obj(list));
    1
}

fn list_len(vm: &mut Vm) -> i32 {
    match receiver_obj(vm, ObjKind::List) {
        Ok(list) => {
            let len = list.as_list().expect("list").len() as i64;
            vm.push(Value::Integer(len));
            1
        }
        Err(status) => status,
    }
}

fn list_remove(vm: &mut Vm) -> i32 {
    let list = match receiver_obj(vm, ObjKind::List) {
        Ok(list) => list,
        Err(status) => return status,
    };
    let index = match integer_arg(vm, 0) {
        Ok(index) => index,
        Err(status) => return status,
    };
    // Out-of-bound removal is not an error: it returns null.
    let removed = usize::try_from(index)
        .ok()
        .and_then(|i| vm.heap().list_remove(list, i));
    vm.push(removed.unwrap_or(Value::Null));
    1
}

fn list_sub(vm: &mut Vm) -> i32 {
    let list = match receiver_obj(vm, ObjKind::List) {
        Ok(list) => list,
        Err(status) => return status,
    };
    let total = list.as_list().expect("list").len();
    let (start, end) = match sub_range(vm, total) {
        Ok(range) => range,
        Err(status) => return status,
    };
    let (items, item_type) = {
        let inner = list.as_list().expect("list");
        (inner.items.borrow()[start..end].to_vec(), inner.item_type)
    };
    let sub = vm.heap().alloc_list(items, item_type);
    vm.push(Value::Obj(sub));
    1
}

fn list_index_of(vm: &mut Vm) -> i32 {
    let list = match receiver_obj(vm, ObjKind::List) {
        Ok(list) => list,
        Err(status) => return status,
    };
    let needle = vm.native_arg(0).unwrap_or(Value::Null);
    match list.as_list().expect("list").index_of(&needle) {
        Some(position) => vm.push(Value::Integer(position as i64)),
        None => vm.push(Value::Null),
    }
    1
}

fn list_join(vm: &mut Vm) -> i32 {
    let list = match receiver_obj(vm, ObjKind::List) {
        Ok(list) => list,
        Err(status) => return status,
    };
    let separator = match string_arg(vm, 0) {
        Ok(separator) => separator,
        Err(status) => return status,
    };
    let joined = list
        .as_list()
        .expect("list")
        .items
        .borrow()
        .iter()
        .map(crate::object::to_display_string)
        .collect::<Vec<_>>()
        .join(&separator);
    let value = vm.heap().string_value(&joined);
    vm.push(value);
    1
}

fn list_next(vm: &mut Vm) -> i32 {
    let list = match receiver_obj(vm, ObjKind::List) {
        Ok(list) => list,
        Err(status) => return status,
    };
    let previous = match vm.native_arg(0) {
        None | Some(Value::Null) => None,
        Some(Value::Integer(n)) => match usize::try_from(n) {
            Ok(n) => Some(n),
            Err(_) => {
                return vm
                    .native_error(RuntimeErrorKind::BadNumber, "`key` must not be negative")
            }
        },
        Some(_) => {
            return vm.native_error(RuntimeErrorKind::BadNumber, "`key` must be an integer")
        }
    };
    match list.as_list().expect("list").next_index(previous) {
        Some(next) => vm.push(Value::Integer(next as i64)),
        None => vm.push(Value::Null),
    }
    1
}

// =============================================================================
// Map members
// =============================================================================

fn map_size(vm: &mut Vm) -> i32 {
    match receiver_obj(vm, ObjKind::Map) {
        Ok(map) => {
            let size = map.as_map().expect("map").data.borrow().size() as i64;
            vm.push(Value::Integer(size));
            1
        }
        Err(status) => status,
    }
}

fn map_remove(vm: &mut Vm) -> i32 {
    let map = match receiver_obj(vm, ObjKind::Map) {
        Ok(map) => map,
        Err(status) => return status,
    };
    let key = vm.native_arg(0).unwrap_or(Value::Null);
    let Some(key) = HashableValue::from_value(key) else {
        return vm.native_error(RuntimeErrorKind::Custom, "value cannot be used as a map key");
    };
    let removed = vm.heap().map_remove(map, &key);
    vm.push(removed.unwrap_or(Value::Null));
    1
}

fn map_keys(vm: &mut Vm) -> i32 {
    match receiver_obj(vm, ObjKind::Map) {
        Ok(map) => {
            let inner = map.as_map().expect("map");
            let keys: Vec<Value> = inner
                .data
                .borrow()
                .keys()
                .into_iter()
                .map(HashableValue::into_value)
                .collect();
            let key_type = inner.key_type;
            let list = vm.heap().alloc_list(keys, key_type);
            vm.push(Value::Obj(list));
            1
        }
        Err(status) => status,
    }
}

fn map_values(vm: &mut Vm) -> i32 {
    match receiver_obj(vm, ObjKind::Map) {
        Ok(map) => {
            let inner = map.as_map().expect("map");
            let values = inner.data.borrow().values();
            let value_type = inner.value_type;
            let list = vm.heap().alloc_list(values, value_type);
            vm.push(Value::Obj(list));
            1
        }
        Err(status) => status,
    }
}

fn map_raw_next(vm: &mut Vm) -> i32 {
    let map = match receiver_obj(vm, ObjKind::Map) {
        Ok(map) => map,
        Err(status) => return status,
    };
    let previous = match vm.native_arg(0) {
        None | Some(Value::Null) => None,
        Some(value) => match HashableValue::from_value(value) {
            Some(key) => Some(key),
            None => {
                return vm
                    .native_error(RuntimeErrorKind::Custom, "value cannot be used as a map key")
            }
        },
    };
    let next = map
        .as_map()
        .expect("map")
        .data
        .borrow()
        .raw_next(previous.as_ref());
    match next {
        Some(key) => vm.push(key.into_value()),
        None => vm.push(Value::Null),
    }
    1
}

// =============================================================================
// Pattern members
// =============================================================================

fn capture_list(vm: &Vm, captures: Vec<Option<String>>) -> Value {
    let item_type = vm.heap().type_basic(TypeKind::String, true);
    let items: Vec<Value> = captures
        .into_iter()
        .map(|capture| match capture {
            Some(text) => vm.heap().string_value(&text),
            None => Value::Null,
        })
        .collect();
    Value::Obj(vm.heap().alloc_list(items, item_type))
}

fn pattern_match(vm: &mut Vm) -> i32 {
    let pattern = match receiver_obj(vm, ObjKind::Pattern) {
        Ok(pattern) => pattern,
        Err(status) => return status,
    };
    let subject = match string_arg(vm, 0) {
        Ok(subject) => subject,
        Err(status) => return status,
    };
    match pattern.as_pattern().expect("pattern").match_once(&subject) {
        Some(captures) => {
            let list = capture_list(vm, captures);
            vm.push(list);
        }
        None => vm.push(Value::Null),
    }
    1
}

fn pattern_match_all(vm: &mut Vm) -> i32 {
    let pattern = match receiver_obj(vm, ObjKind::Pattern) {
        Ok(pattern) => pattern,
        Err(status) => return status,
    };
    let subject = match string_arg(vm, 0) {
        Ok(subject) => subject,
        Err(status) => return status,
    };
    match pattern.as_pattern().expect("pattern").match_all(&subject) {
        Some(all) => {
            let inner_type = vm.heap().type_basic(TypeKind::String, true);
            let item_type = vm.heap().type_list(inner_type, false);
            let lists: Vec<Value> = all
                .into_iter()
                .map(|captures| capture_list(vm, captures))
                .collect();
            let outer = vm.heap().alloc_list(lists, item_type);
            vm.push(Value::Obj(outer));
        }
        None => vm.push(Value::Null),
    }
    1
}

// =============================================================================
// Fiber members
// =============================================================================

fn fiber_over(vm: &mut Vm) -> i32 {
    match receiver_obj(vm, ObjKind::Fiber) {
        Ok(fiber) => {
            let over = fiber.as_fiber().expect("fiber").is_over();
            vm.push(Value::Boolean(over));
            1
        }
        Err(status) => status,
    }
}

fn fiber_cancel(vm: &mut Vm) -> i32 {
    match receiver_obj(vm, ObjKind::Fiber) {
        Ok(fiber) => {
            fiber.as_fiber().expect("fiber").cancel();
            0
        }
        Err(status) => status,
    }
}

fn fiber_is_main(vm: &mut Vm) -> i32 {
    match receiver_obj(vm, ObjKind::Fiber) {
        Ok(fiber) => {
            let is_main = vm.is_root_fiber(&fiber);
            vm.push(Value::Boolean(is_main));
            1
        }
        Err(status) => status,
    }
}

// =============================================================================
// Compile-time member signatures
// =============================================================================

/// Build (and cache) the declared signature of a built-in member, given the
/// receiver's TypeDef. Returns `None` for unknown members.
pub fn member_def(heap: &Heap, receiver_type: ObjRef, name: ObjRef) -> Option<ObjRef> {
    if let Some(hit) = heap.cached_member_def(receiver_type, name) {
        return Some(hit);
    }
    let name_text = name.as_string()?.as_str().to_string();
    let ty = receiver_type.as_type()?;
    let def = match ty.kind() {
        TypeKind::String => string_member_def(heap, receiver_type, &name_text)?,
        TypeKind::List => {
            let item = match &ty.data().payload {
                Some(TypeUnion::List { item }) => *item,
                _ => return None,
            };
            list_member_def(heap, receiver_type, item, &name_text)?
        }
        TypeKind::Map => {
            let (key, value) = match &ty.data().payload {
                Some(TypeUnion::Map { key, value }) => (*key, *value),
                _ => return None,
            };
            map_member_def(heap, key, value, &name_text)?
        }
        TypeKind::Pattern => pattern_member_def(heap, &name_text)?,
        TypeKind::Fiber => fiber_member_def(heap, &name_text)?,
        _ => return None,
    };
    heap.cache_member_def(receiver_type, name, def);
    Some(def)
}

fn param(name: &str, type_def: ObjRef) -> ParameterDef {
    ParameterDef {
        name: name.to_string(),
        type_def,
        has_default: false,
    }
}

fn optional_param(name: &str, type_def: ObjRef) -> ParameterDef {
    ParameterDef {
        name: name.to_string(),
        type_def,
        has_default: true,
    }
}

fn signature(
    heap: &Heap,
    parameters: Vec<ParameterDef>,
    return_type: ObjRef,
) -> ObjRef {
    let void = heap.type_basic(TypeKind::Void, false);
    heap.type_function(parameters, return_type, void)
}

fn string_member_def(heap: &Heap, receiver: ObjRef, name: &str) -> Option<ObjRef> {
    let num = heap.type_basic(TypeKind::Number, false);
    let num_opt = heap.type_basic(TypeKind::Number, true);
    let str_ty = heap.type_basic(TypeKind::String, false);
    let bool_ty = heap.type_basic(TypeKind::Bool, false);
    Some(match name {
        "len" => signature(heap, vec![], num),
        "byte" => signature(heap, vec![param("at", num)], num),
        "indexOf" => signature(heap, vec![param("needle", str_ty)], num_opt),
        "startsWith" => signature(heap, vec![param("needle", str_ty)], bool_ty),
        "endsWith" => signature(heap, vec![param("needle", str_ty)], bool_ty),
        "replace" => signature(
            heap,
            vec![param("needle", str_ty), param("with", str_ty)],
            str_ty,
        ),
        "sub" => signature(
            heap,
            vec![param("start", num), optional_param("len", num_opt)],
            receiver,
        ),
        "split" => signature(
            heap,
            vec![param("separator", str_ty)],
            heap.type_list(str_ty, false),
        ),
        "repeat" => signature(heap, vec![param("n", num)], str_ty),
        "upper" | "lower" | "trim" | "encodeBase64" | "decodeBase64" => {
            signature(heap, vec![], str_ty)
        }
        _ => return None,
    })
}

fn list_member_def(heap: &Heap, receiver: ObjRef, item: ObjRef, name: &str) -> Option<ObjRef> {
    let num = heap.type_basic(TypeKind::Number, false);
    let num_opt = heap.type_basic(TypeKind::Number, true);
    let str_ty = heap.type_basic(TypeKind::String, false);
    let item_opt = heap.clone_with_optional(&item, true);
    Some(match name {
        "append" => signature(heap, vec![param("value", item)], receiver),
        "len" => signature(heap, vec![], num),
        "remove" => signature(heap, vec![param("at", num)], item_opt),
        "sub" => signature(
            heap,
            vec![param("start", num), optional_param("len", num_opt)],
            receiver,
        ),
        "indexOf" => signature(heap, vec![param("needle", item)], num_opt),
        "join" => signature(heap, vec![param("separator", str_ty)], str_ty),
        "next" => signature(heap, vec![optional_param("key", num_opt)], num_opt),
        _ => return None,
    })
}

fn map_member_def(heap: &Heap, key: ObjRef, value: ObjRef, name: &str) -> Option<ObjRef> {
    let num = heap.type_basic(TypeKind::Number, false);
    let key_opt = heap.clone_with_optional(&key, true);
    let value_opt = heap.clone_with_optional(&value, true);
    Some(match name {
        "size" => signature(heap, vec![], num),
        "remove" => signature(heap, vec![param("at", key)], value_opt),
        "keys" => signature(heap, vec![], heap.type_list(key, false)),
        "values" => signature(heap, vec![], heap.type_list(value, false)),
        "rawNext" => signature(heap, vec![optional_param("key", key_opt)], key_opt),
        _ => return None,
    })
}

fn pattern_member_def(heap: &Heap, name: &str) -> Option<ObjRef> {
    let str_ty = heap.type_basic(TypeKind::String, false);
    let str_opt = heap.type_basic(TypeKind::String, true);
    let captures = heap.type_list(str_opt, true);
    Some(match name {
        "match" => signature(heap, vec![param("subject", str_ty)], captures),
        "matchAll" => {
            let capture_list = heap.type_list(str_opt, false);
            signature(
                heap,
                vec![param("subject", str_ty)],
                heap.type_list(capture_list, true),
            )
        }
        _ => return None,
    })
}

fn fiber_member_def(heap: &Heap, name: &str) -> Option<ObjRef> {
    let bool_ty = heap.type_basic(TypeKind::Bool, false);
    let void = heap.type_basic(TypeKind::Void, false);
    Some(match name {
        "over" => signature(heap, vec![], bool_ty),
        "cancel" => signature(heap, vec![], void),
        "isMain" => signature(heap, vec![], bool_ty),
        _ => return None,
    })
}
