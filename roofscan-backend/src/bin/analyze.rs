// Run the damage pipeline on one roof photo and print the findings
use damage_detector::{ImageInput, Severity};
use roofscan_backend::annotator::annotate;
use roofscan_backend::pipeline::CoarseResult;
use roofscan_backend::{
    init_tracing, pipeline_from_env, AnalysisResult, DamageSummary, MergedDamage, PipelineConfig,
    PipelineEvent,
};
use std::fs;

struct Args {
    image_path: String,
    json_out: Option<String>,
    annotated_out: Option<String>,
    stream: bool,
}

fn parse_args() -> Option<Args> {
    let mut args = std::env::args().skip(1);
    let image_path = args.next()?;
    let mut parsed = Args {
        image_path,
        json_out: None,
        annotated_out: None,
        stream: false,
    };

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--json" => parsed.json_out = Some(args.next()?),
            "--annotated" => parsed.annotated_out = Some(args.next()?),
            "--stream" => parsed.stream = true,
            _ => return None,
        }
    }
    Some(parsed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    println!("🏠 Roof Damage Analysis");
    println!("=======================\n");

    let Some(args) = parse_args() else {
        eprintln!("Usage: cargo run --bin analyze <IMAGE_PATH> [--json <OUT>] [--annotated <OUT.jpg>] [--stream]");
        eprintln!("\nOptions:");
        eprintln!("  --json <OUT>        Write the full result as JSON");
        eprintln!("  --annotated <OUT>   Write the image with severity-coloured boxes");
        eprintln!("  --stream            Print the detector-only phase before the refined one");
        eprintln!("\nEnvironment:");
        eprintln!("  ROBOFLOW_API_KEY (required for the default detector)");
        eprintln!("  OPENAI_API_KEY   (enables reasoning; required with DETECTOR_BACKEND=vision)");
        eprintln!("  DETECTOR_BACKEND roboflow (default) or vision");
        return Ok(());
    };

    println!("📂 Image: {}", args.image_path);
    let image = ImageInput::from_bytes(fs::read(&args.image_path)?)?;
    println!("✅ Loaded {} bytes ({})\n", image.len(), image.media_type());

    let pipeline = pipeline_from_env(PipelineConfig::from_env());

    let result = if args.stream {
        let mut events = pipeline.stream(image.clone());
        let mut final_result = None;
        while let Some(event) = events.recv().await {
            match event {
                PipelineEvent::Phase1(coarse) => print_coarse(&coarse),
                PipelineEvent::Phase2(result) | PipelineEvent::Complete(result) => {
                    final_result = Some(result)
                }
                PipelineEvent::Error { code, message } => {
                    eprintln!("❌ Analysis failed ({}): {}", code, message);
                    return Ok(());
                }
            }
        }
        match final_result {
            Some(result) => result,
            None => return Err("stream ended without a result".into()),
        }
    } else {
        println!("🔬 Detecting and reasoning...\n");
        match pipeline.analyze(image.clone()).await {
            Ok(result) => result,
            Err(e) => {
                eprintln!("❌ Analysis failed: {}", e);
                return Ok(());
            }
        }
    };

    print_result(&result);

    if let Some(path) = &args.json_out {
        fs::write(path, serde_json::to_string_pretty(&result)?)?;
        println!("\n💾 Saved result to: {}", path);
    }

    if let Some(path) = &args.annotated_out {
        fs::write(path, annotate(&image, &result.damages)?)?;
        println!("🖼️  Saved annotated image to: {}", path);
    }

    Ok(())
}

fn print_coarse(coarse: &CoarseResult) {
    println!(
        "⚡ Phase 1: {} regions from the detector (provisional)",
        coarse.damages.len()
    );
    print_summary(&coarse.summary);
    println!();
}

fn print_result(result: &AnalysisResult) {
    println!("📊 Results");
    println!("{}", "=".repeat(70));
    print_summary(&result.summary);

    if result.damages.is_empty() {
        println!("\n✅ No damage detected");
    } else {
        println!("\n📋 Damages:");
        for damage in &result.damages {
            print_damage(damage);
        }
    }

    println!("\n🏁 Overall: {}", result.assessment.overall_severity);
    if result.assessment.immediate_action_needed {
        println!("⚠️  Immediate action needed");
    }
    println!("📝 {}", result.assessment.narrative);

    let metadata = &result.metadata;
    println!(
        "\n⏱️  {}ms total ({} refined, {} detector fallback)",
        metadata.execution_time_ms, metadata.refined_regions, metadata.fallback_regions
    );
    for (stage, ms) in &metadata.stage_timings {
        println!("   {:<12} {}ms", stage, ms);
    }
}

fn print_summary(summary: &DamageSummary) {
    println!(
        "   Total: {}  (severe {}, moderate {}, minor {})",
        summary.total_damages,
        summary.count(Severity::Severe),
        summary.count(Severity::Moderate),
        summary.count(Severity::Minor)
    );
}

fn print_damage(damage: &MergedDamage) {
    let [x1, y1, x2, y2] = damage.bbox.as_array();
    println!(
        "  #{} {} [{}] conf {:.0}% at [{:.1}, {:.1}, {:.1}, {:.1}]",
        damage.index,
        damage.damage_type.label(),
        damage.severity,
        damage.confidence * 100.0,
        x1,
        y1,
        x2,
        y2
    );
    println!("     {}", damage.description);
    if !damage.severity_reasoning.is_empty() {
        println!("     ↳ {}", damage.severity_reasoning);
    }
}
