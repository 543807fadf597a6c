use crate::core::config::data::{path_display, Config, ConfigKey};

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        for key in ConfigKey::ALL {
            let value = self.get(key);
            match (key, value) {
                (ConfigKey::DataDir, Some(path)) => {
                    println!("  {}: {}", key.name(), path_display(path))
                }
                (_, Some(value)) => println!("  {}: {value}", key.name()),
                (_, None) => println!("  {}: (default: {})", key.name(), key.default_display()),
            }
        }
    }
}
