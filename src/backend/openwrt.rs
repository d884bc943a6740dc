use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tera::{Context, Tera};

/// UCI-style layout: one block per package, then embedded files
const LAYOUT: &str = r#"{% for package in packages %}package {{ package.name }}
{% for section in package.sections %}
config {{ section.kind }} '{{ section.name }}'
{% for option in section.options %}	{{ option.keyword }} {{ option.key }} '{{ option.value }}'
{% endfor %}{% endfor %}
{% endfor %}{% if files %}# ---------- files ---------- #
{% for file in files %}
# path: {{ file.path }}
# mode: {{ file.mode }}

{{ file.contents }}
{% endfor %}{% endif %}"#;

#[derive(Debug, Serialize)]
struct Package {
    name: String,
    sections: Vec<Section>,
}

#[derive(Debug, Serialize)]
struct Section {
    kind: String,
    name: String,
    options: Vec<UciOption>,
}

#[derive(Debug, Serialize)]
struct UciOption {
    keyword: &'static str,
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct File {
    path: String,
    mode: String,
    contents: String,
}

/// Compile an already validated and substituted config tree
pub fn render(config: &Value) -> Result<String> {
    let empty = Map::new();
    let root = config.as_object().unwrap_or(&empty);

    let mut packages = Vec::new();

    if let Some(general) = root.get("general").and_then(Value::as_object) {
        packages.push(Package {
            name: "system".to_string(),
            sections: vec![section("system", "system", general)],
        });
    }

    let mut network = Vec::new();
    for iface in named_items(root.get("interfaces")) {
        let name = item_name(iface);
        let mut s = section("interface", &name, iface);
        s.options.insert(0, option("ifname", &Value::String(name)));
        network.push(s);
    }
    let mut dns = Map::new();
    for key in ["dns_servers", "dns_search"] {
        if let Some(list) = root.get(key) {
            dns.insert(key.trim_start_matches("dns_").to_string(), list.clone());
        }
    }
    if !dns.is_empty() {
        network.push(section("dns", "dns", &dns));
    }
    if !network.is_empty() {
        packages.push(Package { name: "network".to_string(), sections: network });
    }

    let openvpn: Vec<Section> = named_items(root.get("openvpn"))
        .map(|client| section("openvpn", &item_name(client), client))
        .collect();
    if !openvpn.is_empty() {
        packages.push(Package { name: "openvpn".to_string(), sections: openvpn });
    }

    let files: Vec<File> = root
        .get("files")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|f| File {
                    path: text(&f["path"]),
                    mode: text(&f["mode"]),
                    contents: text(&f["contents"]),
                })
                .collect()
        })
        .unwrap_or_default();

    let mut tera = Tera::default();
    tera.add_raw_template("openwrt", LAYOUT)
        .map_err(|e| anyhow::anyhow!("Invalid layout: {}", e))?;

    let mut context = Context::new();
    context.insert("packages", &packages);
    context.insert("files", &files);

    tera.render("openwrt", &context)
        .map_err(|e| anyhow::anyhow!("Rendering failed: {}", e))
}

fn named_items(value: Option<&Value>) -> impl Iterator<Item = &Map<String, Value>> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn item_name(item: &Map<String, Value>) -> String {
    item.get("name").map(text).unwrap_or_default()
}

/// Scalars become `option`, lists of scalars become `list` entries, nested
/// structures are kept as JSON text
fn section(kind: &str, name: &str, values: &Map<String, Value>) -> Section {
    let mut options = Vec::new();
    for (key, value) in values {
        if key == "name" {
            continue;
        }
        match value {
            Value::Array(items) if items.iter().all(|v| !v.is_object() && !v.is_array()) => {
                for item in items {
                    options.push(UciOption { keyword: "list", key: key.clone(), value: text(item) });
                }
            }
            other => options.push(option(key, other)),
        }
    }
    Section { kind: kind.to_string(), name: name.to_string(), options }
}

fn option(key: &str, value: &Value) -> UciOption {
    UciOption { keyword: "option", key: key.to_string(), value: text(value) }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
