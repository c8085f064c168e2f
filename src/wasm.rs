use wasm_bindgen::prelude::*;

/// Runs an SBText project from the green flag for `ticks` ticks and returns
/// the final state as JSON.
#[wasm_bindgen]
pub fn run_source(source: &str, ticks: u32) -> Result<String, JsValue> {
    crate::run_source_to_json(source, u64::from(ticks)).map_err(|e| JsValue::from_str(&e.to_string()))
}
