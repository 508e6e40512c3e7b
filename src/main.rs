use clap::Parser;
use kiosk_agent::bus::{CommandBus, ProviderChain};
use kiosk_agent::config::load_settings;
use kiosk_agent::demo::{
    CannedKnowledge, FakeSynthesis, FixedAffect, MemoryRepository, ScriptedGeneration,
    ScriptedTranscription,
};
use kiosk_agent::error::Result;
use kiosk_agent::llm::{tools, PromptFactory, TieredGeneration, ToolRegistry};
use kiosk_agent::pipeline::UtteranceOrchestrator;
use kiosk_agent::ports::{
    EmotionalState, GenerationPort, RepositoryPort, SynthesisPort, TranscriptionPort,
};
use kiosk_agent::vad::Utterance;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "kiosk-agent", about = "Resilient voice-assistant pipeline")]
struct Args {
    /// Run scripted demo turns instead of connecting real providers.
    #[arg(long)]
    demo: bool,

    /// Make the primary generation provider fail its first N calls, to
    /// watch the failover chain in the logs.
    #[arg(long, default_value_t = 0)]
    outage_calls: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    log::info!("🚀 Initializing kiosk-agent");

    let settings =
        load_settings().map_err(|e| kiosk_agent::AgentError::Config(e.to_string()))?;

    if !args.demo {
        eprintln!("❌ No provider adapters are wired into this binary yet.");
        eprintln!("   Run with --demo to exercise the full pipeline with scripted providers.");
        std::process::exit(1);
    }

    // Scripted guest lines, one per demo turn. The empty line exercises the
    // unintelligible-utterance fallback.
    let guest_lines = vec![
        "hello good morning",
        "what's the wifi password",
        "can you book the spa for me",
        "",
    ];

    let transcription: Arc<dyn TranscriptionPort> =
        Arc::new(ScriptedTranscription::new(guest_lines.clone()));
    let repository = MemoryRepository::new();

    let primary: Arc<dyn GenerationPort> = Arc::new(ScriptedGeneration::failing_first(
        "demo-primary",
        args.outage_calls,
    ));
    let fallback: Arc<dyn GenerationPort> = Arc::new(ScriptedGeneration::new("demo-fallback"));
    let generation = ProviderChain::new(
        "generation",
        vec![
            ("demo-primary".to_string(), primary),
            ("demo-fallback".to_string(), fallback),
        ],
        &settings.resilience,
    )?;

    let synthesis = ProviderChain::new(
        "synthesis",
        vec![(
            "demo-tts".to_string(),
            Arc::new(FakeSynthesis::new("demo-tts")) as Arc<dyn SynthesisPort>,
        )],
        &settings.resilience,
    )?;

    let bus = Arc::new(CommandBus::new(
        generation,
        synthesis,
        Arc::new(CannedKnowledge::default()),
        repository.clone() as Arc<dyn RepositoryPort>,
        settings.resilience.clone(),
    ));

    let mut registry = ToolRegistry::new();
    registry.register(tools::booking_tool(repository.clone()));

    let tiering = TieredGeneration::new(
        bus.clone(),
        settings.tiering.clone(),
        Arc::new(registry),
        PromptFactory::new(settings.pipeline.language.clone()),
    );

    let mut orchestrator = UtteranceOrchestrator::new(
        bus,
        transcription,
        Arc::new(FixedAffect(EmotionalState::Neutral)),
        tiering,
        settings.pipeline.clone(),
    );

    println!("🏨 Kiosk demo: {} scripted turns\n", guest_lines.len());

    for (i, line) in guest_lines.iter().enumerate() {
        // One second of silence stands in for the guest's speech; the
        // scripted transcription supplies the words.
        let utterance = Utterance {
            samples: vec![0i16; settings.segmenter.sample_rate as usize],
            started_at: Instant::now(),
            closed_by_silence: true,
        };

        let response = orchestrator
            .run_turn(utterance, CancellationToken::new())
            .await?;

        let mut audio_bytes = 0usize;
        let mut audio = response.audio;
        while let Some(block) = audio.next().await {
            audio_bytes += block?.len();
        }

        println!("Turn {} ─ guest: \"{}\"", i + 1, line);
        println!(
            "         agent ({}): \"{}\" [{} audio bytes]\n",
            response.intent, response.text, audio_bytes
        );
    }

    println!("📒 {}", orchestrator.conversation().summary());
    let bookings = repository.bookings().await;
    if !bookings.is_empty() {
        println!("📒 Bookings saved: {}", serde_json::Value::Array(bookings));
    }
    // Interaction logging is fire-and-forget; let it settle before reading.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let interactions = repository.interactions().await;
    if !interactions.is_empty() {
        match serde_json::to_string_pretty(&interactions) {
            Ok(json) => println!("🧾 Interaction log:\n{}", json),
            Err(e) => log::warn!("Could not serialize interaction log: {}", e),
        }
    }

    Ok(())
}
