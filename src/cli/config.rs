use std::fs;
use std::path::PathBuf;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let sample_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("samples")
        .join("sample-config.yml");
    let config_content = fs::read_to_string(&sample_path)
        .map_err(|e| format!("Failed to read sample config: {}", e))?;

    write_config(&config_content, stdout)
}

fn write_config(config_content: &str, stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let home = dirs::home_dir().ok_or("Could not determine home directory")?;
    let config_dir = home.join(".config/courier");
    let config_path = config_dir.join("config.yml");

    if config_path.exists() {
        return Err(format!(
            "Config already exists at {} (delete it first, or use --stdout)",
            config_path.display()
        )
        .into());
    }

    fs::create_dir_all(&config_dir)?;
    fs::write(&config_path, config_content)?;
    println!("Wrote config to {}", config_path.display());

    Ok(())
}
