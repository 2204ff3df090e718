use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use secron_core::{SecronError, SecronResult};

type MethodHandler = Arc<dyn Fn(Vec<Value>) -> SecronResult<Value> + Send + Sync>;

struct MethodEntry {
    handler: MethodHandler,
    /// 不可访问的方法保留注册项，调用时报"不可访问"而非"未注册"
    accessible: bool,
}

/// 类方法注册表
///
/// class_method类型任务的命令形如 `Class::method(args)` 或
/// `Class@method(args)`，在这里显式注册的处理器中查找并调用。
/// 只有注册过的方法可以被任务触达。
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodEntry>,
    constants: HashMap<String, Value>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个可被任务调用的方法
    pub fn register<F>(&mut self, class: &str, method: &str, handler: F)
    where
        F: Fn(Vec<Value>) -> SecronResult<Value> + Send + Sync + 'static,
    {
        self.methods.insert(
            format!("{class}::{method}"),
            MethodEntry {
                handler: Arc::new(handler),
                accessible: true,
            },
        );
    }

    /// 注册但标记为不可访问，用于只允许内部调用的方法
    pub fn register_hidden<F>(&mut self, class: &str, method: &str, handler: F)
    where
        F: Fn(Vec<Value>) -> SecronResult<Value> + Send + Sync + 'static,
    {
        self.methods.insert(
            format!("{class}::{method}"),
            MethodEntry {
                handler: Arc::new(handler),
                accessible: false,
            },
        );
    }

    /// 定义参数中可引用的具名常量
    pub fn define_constant(&mut self, name: &str, value: Value) {
        self.constants.insert(name.to_string(), value);
    }

    /// 解析命令串并调用对应方法
    pub fn invoke(&self, command: &str) -> SecronResult<Value> {
        let (class, method, raw_args) = parse_command(command)?;
        let entry = self
            .methods
            .get(&format!("{class}::{method}"))
            .ok_or_else(|| SecronError::MethodNotFound {
                class: class.clone(),
                method: method.clone(),
            })?;
        if !entry.accessible {
            return Err(SecronError::MethodNotAccessible { class, method });
        }
        let args = self.parse_args(&raw_args)?;
        (entry.handler)(args)
    }

    /// 参数解析：先整体按JSON解析，数组展开为位置参数，
    /// 其他JSON值作为单参数；JSON解析失败时退回逐项解析。
    fn parse_args(&self, raw: &str) -> SecronResult<Vec<Value>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return Ok(match value {
                Value::Array(items) => items,
                other => vec![other],
            });
        }

        split_args(raw)
            .into_iter()
            .map(|item| self.coerce_arg(item.trim()))
            .collect()
    }

    /// 单个参数的类型推断
    fn coerce_arg(&self, item: &str) -> SecronResult<Value> {
        if item.is_empty() {
            return Ok(Value::String(String::new()));
        }
        match item {
            "null" => return Ok(Value::Null),
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            _ => {}
        }
        if let Ok(n) = item.parse::<i64>() {
            return Ok(Value::from(n));
        }
        if item.contains('.') {
            if let Ok(f) = item.parse::<f64>() {
                return Ok(Value::from(f));
            }
        }
        if (item.starts_with('"') && item.ends_with('"') && item.len() >= 2)
            || (item.starts_with('\'') && item.ends_with('\'') && item.len() >= 2)
        {
            return Ok(Value::String(strip_slashes(&item[1..item.len() - 1])));
        }
        if item.starts_with('[') || item.starts_with('{') {
            return Ok(serde_json::from_str(item).unwrap_or(Value::Null));
        }
        if let Some(value) = self.constants.get(item) {
            return Ok(value.clone());
        }
        Ok(Value::String(item.to_string()))
    }
}

/// 拆出类名、方法名和括号内的参数串
///
/// 分隔符支持 `::` 和 `@`，参数括号可省略。
fn parse_command(command: &str) -> SecronResult<(String, String, String)> {
    let command = command.trim();
    let (class, rest) = if let Some(pos) = command.find("::") {
        (&command[..pos], &command[pos + 2..])
    } else if let Some(pos) = command.find('@') {
        (&command[..pos], &command[pos + 1..])
    } else {
        return Err(SecronError::CommandInvalid(command.to_string()));
    };

    let class = class.trim();
    let rest = rest.trim();
    if class.is_empty() || rest.is_empty() {
        return Err(SecronError::CommandInvalid(command.to_string()));
    }

    let (method, raw_args) = match rest.find('(') {
        Some(open) => {
            if !rest.ends_with(')') {
                return Err(SecronError::CommandInvalid(command.to_string()));
            }
            (&rest[..open], &rest[open + 1..rest.len() - 1])
        }
        None => (rest, ""),
    };

    let method = method.trim();
    if method.is_empty() || !is_identifier(class) || !is_identifier(method) {
        return Err(SecronError::CommandInvalid(command.to_string()));
    }
    Ok((class.to_string(), method.to_string(), raw_args.to_string()))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '\\' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '\\')
}

/// 在引号和括号外按逗号切分参数，引号内的逗号与转义引号保持原样
fn split_args(raw: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut escaped = false;

    for c in raw.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quote.is_some() => {
                current.push(c);
                escaped = true;
            }
            '"' | '\'' => {
                match quote {
                    None => quote = Some(c),
                    Some(q) if q == c => quote = None,
                    Some(_) => {}
                }
                current.push(c);
            }
            '[' | '{' if quote.is_none() => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' if quote.is_none() => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if quote.is_none() && depth == 0 => {
                items.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    items.push(current);
    items
}

/// 去掉反斜杠转义
fn strip_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_echo() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry.register("Foo", "bar", |args| Ok(Value::Array(args)));
        registry
    }

    #[test]
    fn test_positional_args_json_first() {
        let registry = registry_with_echo();
        let result = registry.invoke(r#"Foo::bar(1, "x", true, null)"#).unwrap();
        assert_eq!(result, json!([1, "x", true, null]));
    }

    #[test]
    fn test_single_json_object_arg() {
        let registry = registry_with_echo();
        let result = registry.invoke(r#"Foo::bar({"a": 1})"#).unwrap();
        assert_eq!(result, json!([{"a": 1}]));
    }

    #[test]
    fn test_at_separator_and_no_parens() {
        let registry = registry_with_echo();
        assert_eq!(registry.invoke("Foo@bar").unwrap(), json!([]));
        assert_eq!(registry.invoke("Foo@bar(7)").unwrap(), json!([7]));
    }

    #[test]
    fn test_fallback_coercion() {
        let registry = registry_with_echo();
        // 末尾多余逗号使整体JSON解析失败，走逐项推断
        let result = registry
            .invoke(r#"Foo::bar(1, 2.5, 'a,b', raw, )"#)
            .unwrap();
        assert_eq!(result, json!([1, 2.5, "a,b", "raw", ""]));
    }

    #[test]
    fn test_quoted_string_with_escapes() {
        let registry = registry_with_echo();
        let result = registry.invoke(r#"Foo::bar('it\'s', x)"#).unwrap();
        assert_eq!(result, json!(["it's", "x"]));
    }

    #[test]
    fn test_constant_lookup() {
        let mut registry = registry_with_echo();
        registry.define_constant("MAX_RETRY", json!(3));
        let result = registry.invoke("Foo::bar(MAX_RETRY, other)").unwrap();
        assert_eq!(result, json!([3, "other"]));
    }

    #[test]
    fn test_method_not_found() {
        let registry = registry_with_echo();
        let err = registry.invoke("Foo::missing()").unwrap_err();
        assert!(matches!(err, SecronError::MethodNotFound { .. }));
    }

    #[test]
    fn test_hidden_method_not_accessible() {
        let mut registry = MethodRegistry::new();
        registry.register_hidden("Foo", "secret", |_| Ok(Value::Null));
        let err = registry.invoke("Foo::secret()").unwrap_err();
        assert!(matches!(err, SecronError::MethodNotAccessible { .. }));
    }

    #[test]
    fn test_invalid_command_shapes() {
        let registry = registry_with_echo();
        for bad in ["plain string", "Foo::", "::bar()", "Foo::bar(1", "Foo::b ar()"] {
            assert!(
                matches!(
                    registry.invoke(bad).unwrap_err(),
                    SecronError::CommandInvalid(_)
                ),
                "应拒绝: {bad}"
            );
        }
    }

    #[test]
    fn test_nested_json_arg_in_fallback() {
        let registry = registry_with_echo();
        let result = registry.invoke(r#"Foo::bar([1,2], end)"#).unwrap();
        assert_eq!(result, json!([[1, 2], "end"]));
    }
}
