// Example: Assess one damage region of a roof photo with the vision model
use damage_detector::{normalize::coarse_severity, BoundingBox, DamageType, ImageInput, RawDetection};
use std::fs;
use vision_reasoner::{RegionReasoner, VisionClient, VisionRegionReasoner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("🔍 Roof Damage Region Reasoner");
    println!("==============================\n");

    // Check for OPENAI_API_KEY
    if std::env::var("OPENAI_API_KEY").is_err() {
        eprintln!("❌ Error: OPENAI_API_KEY environment variable not set");
        eprintln!("\nPlease set your OpenAI API key:");
        eprintln!("  export OPENAI_API_KEY=sk-...");
        return Ok(());
    }

    // Image path and bbox percentages from the command line
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 6 {
        eprintln!("Usage: cargo run --example assess_region <IMAGE_PATH> <X1> <Y1> <X2> <Y2> [CONFIDENCE]");
        eprintln!("Example: cargo run --example assess_region roof.jpg 40 35 60 55 0.87");
        return Ok(());
    }

    let coords: Vec<f64> = args[2..6]
        .iter()
        .map(|s| s.parse::<f64>())
        .collect::<Result<_, _>>()?;
    let confidence: f64 = args.get(6).map(|s| s.parse()).transpose()?.unwrap_or(0.8);
    let bbox = BoundingBox::new(coords[0], coords[1], coords[2], coords[3])?;

    println!("📂 Loading image: {}", args[1]);
    let image = ImageInput::from_bytes(fs::read(&args[1])?)?;
    println!("✅ Loaded {} bytes ({})\n", image.len(), image.media_type());

    let detection = RawDetection {
        index: 0,
        bbox,
        confidence,
        class_label: "damage".to_string(),
        coarse_type: DamageType::RoofDamage,
        coarse_severity: coarse_severity(confidence, &bbox),
        coarse_description: "manually selected region".to_string(),
    };

    let client = VisionClient::from_env(reqwest::Client::new());
    let reasoner = VisionRegionReasoner::new(client.clone());

    println!("🤖 Assessing region with {}...", client.model());
    println!("(This may take 5-10 seconds)\n");

    let assessment = reasoner.assess(&detection, &image).await;

    if !assessment.refined {
        eprintln!("⚠️  Reasoning unavailable: {}", assessment.severity_reasoning);
        eprintln!("   Showing detector estimate instead.\n");
    }

    println!("📊 Result:");
    println!("{}", "=".repeat(70));
    println!("   Type:        {}", assessment.damage_type.label());
    println!("   Severity:    {}", assessment.severity);
    println!("   Description: {}", assessment.description);
    println!("   Reasoning:   {}", assessment.severity_reasoning);
    println!("   Confidence:  {}", assessment.confidence_note);
    println!("{}", "=".repeat(70));

    println!("\n{}", serde_json::to_string_pretty(&assessment)?);

    Ok(())
}
