//! # Burn Record Utilities

use burn::prelude::Backend;
use burn::record::{HalfPrecisionSettings, Record};
use serde_json::{Map, Value};

fn shape_of_numeric_array(arr: &[Value]) -> Option<Vec<usize>> {
    match arr.first() {
        None => Some(vec![0]),
        Some(Value::Number(_)) => Some(vec![arr.len()]),
        Some(Value::Array(inner)) => {
            let inner_shape = shape_of_numeric_array(inner)?;
            Some(std::iter::once(arr.len()).chain(inner_shape).collect())
        }
        Some(_) => None,
    }
}

/// Replace numeric arrays with ``{"_shape": [...]}``, and drop raw bytes and nulls.
fn summarize_value(value: Value) -> Value {
    match value {
        Value::Array(a) => match shape_of_numeric_array(&a) {
            Some(shape) => {
                let mut obj = Map::new();
                obj.insert(
                    "_shape".to_string(),
                    Value::Array(shape.into_iter().map(Value::from).collect()),
                );
                Value::Object(obj)
            }
            None => Value::Array(a.into_iter().map(summarize_value).collect()),
        },
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .filter(|(k, v)| k != "bytes" && !v.is_null())
                .map(|(k, v)| {
                    let v = if k == "shape" { v } else { summarize_value(v) };
                    (k, v)
                })
                .collect(),
        ),
        v => v,
    }
}

/// Summarize the structure of a record as JSON.
///
/// Tensor payloads are elided; the tensor ``shape`` entries are kept.
pub fn summarize_record<B: Backend, R: Record<B>>(record: R) -> anyhow::Result<Value> {
    let item = record.into_item::<HalfPrecisionSettings>();
    Ok(summarize_value(serde_json::to_value(&item)?))
}

/// Print [`summarize_record`] as pretty JSON.
pub fn display_record<B: Backend, R: Record<B>>(record: R) -> anyhow::Result<()> {
    let value = summarize_record(record)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::module::Module;
    use burn::nn::conv::Conv2dConfig;
    use serde_json::json;

    #[test]
    fn test_shape_of_numeric_array() {
        assert_eq!(shape_of_numeric_array(&[]), Some(vec![0]));
        assert_eq!(
            shape_of_numeric_array(&[json!(1), json!(2)]),
            Some(vec![2])
        );
        assert_eq!(
            shape_of_numeric_array(&[json!([1, 2, 3]), json!([4, 5, 6])]),
            Some(vec![2, 3])
        );
        assert_eq!(shape_of_numeric_array(&[json!("a")]), None);
    }

    #[test]
    fn test_summarize_value() {
        let value = json!({
            "param": {"bytes": [1, 2, 3], "shape": [3], "dtype": "F32"},
            "values": [[1.0, 2.0]],
            "skip": null,
        });
        assert_eq!(
            summarize_value(value),
            json!({
                "param": {"shape": [3], "dtype": "F32"},
                "values": {"_shape": [1, 2]},
            })
        );
    }

    #[test]
    fn test_summarize_record() {
        let device = Default::default();
        let conv = Conv2dConfig::new([2, 4], [3, 3]).init::<NdArray<f32>>(&device);

        let summary = summarize_record::<NdArray<f32>, _>(conv.into_record()).unwrap();
        let text = summary.to_string();
        assert!(text.contains("\"weight\""));
        assert!(text.contains("[4,2,3,3]"));
        assert!(!text.contains("\"bytes\""));
    }
}
