use std::time::Duration;

use httpflow::prelude::{Client, Context, debug};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct Item {
    id: String,
    #[serde(default)]
    name: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::builder()
        .base_url("https://api.example.com/")
        .timeout(Duration::from_secs(8))
        .connect_timeout(Duration::from_secs(3))
        .middleware(debug(std::env::var_os("HTTPFLOW_DEBUG").is_some()))
        .build()?;

    let mut item = Item::default();
    client
        .post("v1/items")
        .header("X-Client", ["httpflow-demo"])
        .json(&serde_json::json!({ "name": "demo" }))
        .with_context(Context::background().with_timeout(Duration::from_secs(5)))
        .decode_result(&mut item)?;
    println!("created id={} name={}", item.id, item.name);

    let mut view = client
        .request()
        .method("PUT")
        .uri("v1/items/upload")
        .multipart(|form| {
            form.field_value("kind", "note")
                .file_part("file", "Cargo.toml");
        })
        .response_view()?;
    println!(
        "upload status={} type={:?}",
        view.status_code(),
        view.header("content-type")
    );
    println!("upload body={:?}", view.body_json_map()?);
    Ok(())
}
