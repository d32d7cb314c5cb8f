pub mod dom_json;
