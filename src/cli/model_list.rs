//! Model catalog listing

use crate::core::models::{list_available_models, AvailableModel};
use crate::core::settings::Settings;

fn badge(model: &AvailableModel) -> &'static str {
    if model.native_reasoning {
        "🧠 native reasoning"
    } else if model.supports_reasoning {
        "💭 reasoning"
    } else {
        ""
    }
}

pub fn list_models(settings: &Settings) {
    let current = settings.model();
    println!("🤖 Available Models");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut category = "";
    for model in list_available_models() {
        if model.category != category {
            category = &model.category;
            println!();
            println!("{category}");
        }
        let marker = if model.id == current { "*" } else { " " };
        println!("{marker} {:<40} {:<28} {}", model.id, model.name, badge(model));
    }

    if !list_available_models().iter().any(|m| m.id == current) {
        println!();
        println!("* {current} (not in catalog)");
    }
    println!();
    println!(
        "Reasoning mode: {}",
        if settings.use_reasoning() { "on" } else { "off" }
    );
}
