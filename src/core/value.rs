// property values: plain data + the TOSCA intrinsic functions we rewrite
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::core::types::INDEX_VALUE_PROPERTY_NAME;

pub const GET_INPUT: &str = "get_input";
pub const GET_ATTRIBUTE: &str = "get_attribute";
pub const GET_PROPERTY: &str = "get_property";

/// A property / parameter value.
///
/// Function expressions are decoded into [`Function`] at deserialization time, so
/// rewrite passes match on variants instead of probing map keys. `Clone` is a full
/// structural copy: nothing inside a `Value` is shared.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Json", into = "Json")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Function(Function),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    /// `get_input: name` or `get_input: [name, index..]`
    GetInput(Box<Value>),
    GetAttribute(GetAttribute),
    GetProperty(Vec<Value>),
}

/// `get_attribute: [node, attribute, path..]`
#[derive(Debug, Clone, PartialEq)]
pub struct GetAttribute {
    pub node: String,
    pub attribute: String,
    pub path: Vec<Value>,
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn get_input(input: impl Into<String>) -> Value {
        Value::Function(Function::GetInput(Box::new(Value::String(input.into()))))
    }

    /// `get_input: [input, index_value]`, selecting this instance's element of a
    /// list input.
    pub fn get_input_indexed(input: impl Into<String>) -> Value {
        Value::Function(Function::GetInput(Box::new(Value::List(vec![
            Value::String(input.into()),
            Value::string(INDEX_VALUE_PROPERTY_NAME),
        ]))))
    }

    pub fn get_attribute(node: impl Into<String>, attribute: impl Into<String>) -> Value {
        Value::Function(Function::GetAttribute(GetAttribute {
            node: node.into(),
            attribute: attribute.into(),
            path: Vec::new(),
        }))
    }

    pub fn get_property(args: Vec<Value>) -> Value {
        Value::Function(Function::GetProperty(args))
    }

    /// Every get_attribute expression reachable from this value, depth first.
    pub fn get_attributes(&self) -> Vec<&GetAttribute> {
        let mut out = Vec::new();
        self.collect_get_attributes(&mut out);
        out
    }

    fn collect_get_attributes<'a>(&'a self, out: &mut Vec<&'a GetAttribute>) {
        match self {
            Value::List(items) => {
                for item in items {
                    item.collect_get_attributes(out);
                }
            }
            Value::Map(map) => {
                for item in map.values() {
                    item.collect_get_attributes(out);
                }
            }
            Value::Function(Function::GetAttribute(ga)) => {
                out.push(ga);
                for item in &ga.path {
                    item.collect_get_attributes(out);
                }
            }
            Value::Function(Function::GetInput(arg)) => arg.collect_get_attributes(out),
            Value::Function(Function::GetProperty(args)) => {
                for item in args {
                    item.collect_get_attributes(out);
                }
            }
            _ => {}
        }
    }

    /// Visits every get_attribute expression mutably, same order as [`Value::get_attributes`].
    pub fn for_each_get_attribute_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut GetAttribute),
    {
        match self {
            Value::List(items) => {
                for item in items {
                    item.for_each_get_attribute_mut(f);
                }
            }
            Value::Map(map) => {
                for item in map.values_mut() {
                    item.for_each_get_attribute_mut(f);
                }
            }
            Value::Function(Function::GetAttribute(ga)) => {
                f(ga);
                for item in &mut ga.path {
                    item.for_each_get_attribute_mut(f);
                }
            }
            Value::Function(Function::GetInput(arg)) => arg.for_each_get_attribute_mut(f),
            Value::Function(Function::GetProperty(args)) => {
                for item in args {
                    item.for_each_get_attribute_mut(f);
                }
            }
            _ => {}
        }
    }

    pub fn contains_get_input(&self) -> bool {
        match self {
            Value::List(items) => items.iter().any(Value::contains_get_input),
            Value::Map(map) => map.values().any(Value::contains_get_input),
            Value::Function(Function::GetInput(_)) => true,
            Value::Function(Function::GetAttribute(ga)) => ga.path.iter().any(Value::contains_get_input),
            Value::Function(Function::GetProperty(args)) => args.iter().any(Value::contains_get_input),
            _ => false,
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => decode_object(map),
        }
    }
}

fn decode_object(map: JsonMap<String, Json>) -> Value {
    if map.len() == 1 {
        if let Some((key, arg)) = map.iter().next() {
            if let Some(function) = decode_function(key, arg) {
                return Value::Function(function);
            }
        }
    }
    Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
}

// malformed function bodies stay plain maps
fn decode_function(key: &str, arg: &Json) -> Option<Function> {
    match key {
        GET_INPUT => Some(Function::GetInput(Box::new(Value::from(arg.clone())))),
        GET_ATTRIBUTE => {
            let items = arg.as_array()?;
            let node = items.first()?.as_str()?;
            let attribute = items.get(1)?.as_str()?;
            Some(Function::GetAttribute(GetAttribute {
                node: node.to_string(),
                attribute: attribute.to_string(),
                path: items[2..].iter().cloned().map(Value::from).collect(),
            }))
        }
        GET_PROPERTY => {
            let items = arg.as_array()?;
            Some(Function::GetProperty(items.iter().cloned().map(Value::from).collect()))
        }
        _ => None,
    }
}

impl From<Value> for Json {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(b),
            Value::Int(i) => Json::Number(i.into()),
            Value::Float(f) => Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null),
            Value::String(s) => Json::String(s),
            Value::List(items) => Json::Array(items.into_iter().map(Json::from).collect()),
            Value::Map(map) => Json::Object(map.into_iter().map(|(k, v)| (k, Json::from(v))).collect()),
            Value::Function(function) => {
                let (key, arg) = match function {
                    Function::GetInput(arg) => (GET_INPUT, Json::from(*arg)),
                    Function::GetAttribute(ga) => {
                        let mut items = vec![Json::String(ga.node), Json::String(ga.attribute)];
                        items.extend(ga.path.into_iter().map(Json::from));
                        (GET_ATTRIBUTE, Json::Array(items))
                    }
                    Function::GetProperty(args) => {
                        (GET_PROPERTY, Json::Array(args.into_iter().map(Json::from).collect()))
                    }
                };
                let mut map = JsonMap::new();
                map.insert(key.to_string(), arg);
                Json::Object(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_get_attribute_from_yaml() {
        let v: Value = serde_yaml::from_str("{get_attribute: [vm_0, accessIPv4]}").unwrap();
        assert_eq!(v, Value::get_attribute("vm_0", "accessIPv4"));
    }

    #[test]
    fn malformed_function_stays_a_map() {
        let v = Value::from(json!({"get_attribute": "only_a_string"}));
        assert!(matches!(v, Value::Map(_)));

        let v = Value::from(json!({"get_attribute": ["a", "b"], "other": 1}));
        assert!(matches!(v, Value::Map(_)));
    }

    #[test]
    fn get_attributes_are_found_through_maps_and_lists() {
        let v = Value::from(json!({
            "a": [{"get_attribute": ["n1", "ip"]}, "x"],
            "b": {"c": {"get_attribute": ["n2", "mac", 0]}},
            "d": {"get_input": "foo"}
        }));

        let found: Vec<(&str, &str)> = v
            .get_attributes()
            .into_iter()
            .map(|ga| (ga.node.as_str(), ga.attribute.as_str()))
            .collect();
        assert_eq!(found, vec![("n1", "ip"), ("n2", "mac")]);
        assert!(v.contains_get_input());
    }

    #[test]
    fn mutation_rewrites_in_place_and_serializes_back() {
        let mut v = Value::from(json!([{"get_attribute": ["n1", "ip", 0]}]));
        v.for_each_get_attribute_mut(&mut |ga| {
            ga.node = "abstract_n".to_string();
            ga.attribute = "n_ip".to_string();
        });

        assert_eq!(Json::from(v), json!([{"get_attribute": ["abstract_n", "n_ip", 0]}]));
    }

    #[test]
    fn indexed_get_input_selects_by_index_value() {
        assert_eq!(
            Json::from(Value::get_input_indexed("compute_vFSB_name")),
            json!({"get_input": ["compute_vFSB_name", "index_value"]})
        );
    }

    #[test]
    fn clone_is_independent_of_the_original() {
        let original = Value::from(json!({"k": [{"get_attribute": ["n1", "ip"]}]}));
        let mut copy = original.clone();
        copy.for_each_get_attribute_mut(&mut |ga| ga.node = "changed".to_string());

        assert_eq!(original.get_attributes()[0].node, "n1");
        assert_eq!(copy.get_attributes()[0].node, "changed");
    }
}
