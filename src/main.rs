use gym_auth::{
    camera::{self, CaptureDevice, DisplaySurface, FacingMode, NullSurface, V4l2Backend},
    cli::{annotate_faces, AsciiRenderer, AsciiSurface},
    common::{config_file, Config, DevMode, GymAuthError, Paths},
    core::{
        select_face, LoginGate, LoginHandoff, LoginMode, MatchLoop, OnnxExtractor, ScanOutcome,
        ScanState,
    },
    storage::{load_roster_file, save_roster_file, seed_default_admin, AdminRecord, Roster, SessionStore},
};

use clap::{Parser, Subcommand};
use anyhow::Result;
use std::sync::Arc;

const BUNDLED_CONFIG: &str = include_str!("../configs/gym-auth.toml");

#[derive(Parser)]
#[command(name = "gymauth")]
#[command(about = "Gym admin login: password, face and password recovery")]
struct Cli {
    /// Enable development mode (keeps session and captures under ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with username and password
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Log in by scanning your face (Ctrl+C to cancel)
    FaceLogin {
        /// Don't draw the terminal camera preview
        #[arg(long)]
        no_preview: bool,
        /// Use the rear camera
        #[arg(long)]
        rear: bool,
    },
    /// Look up a password by registered phone number
    Recover {
        #[arg(long)]
        phone: String,
    },
    /// Show the logged-in admin
    Whoami,
    /// Clear the stored session
    Logout,
    /// List available cameras
    ListCameras,
    /// Capture a single frame
    TestCamera,
    /// Capture a frame and run face detection on it
    TestDetection,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = load_config(&dev_mode)?;
    let paths = Paths::new(&dev_mode, Some(&config))?;

    match cli.command {
        Commands::Login { username, password } => {
            let mut gate = build_gate(&config, &paths, Arc::new(NullSurface), FacingMode::User)?;
            match gate.login_with_password(&username, &password) {
                Ok(admin) => print_welcome(&admin),
                Err(GymAuthError::InvalidCredentials) => {
                    println!("❌ Invalid username or password");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::FaceLogin { no_preview, rear } => {
            let facing = if rear { FacingMode::Environment } else { FacingMode::User };
            face_login(&config, &paths, !no_preview, facing).await?;
        }
        Commands::Recover { phone } => {
            let mut gate = build_gate(&config, &paths, Arc::new(NullSurface), FacingMode::User)?;
            match gate.recover_password(&phone) {
                Ok(recovered) => {
                    println!("✅ Account: {}", recovered.username);
                    println!("   Your password is: {}", recovered.password);
                }
                Err(e @ GymAuthError::NotFound(_)) => println!("❌ {}", e),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Whoami => {
            let mut gate = build_gate(&config, &paths, Arc::new(NullSurface), FacingMode::User)?;
            gate.restore_session();
            gate.on_roster_synced()?;
            match gate.session() {
                Some(admin) => {
                    println!("👤 {} ({})", admin.name, admin.username);
                    println!("   Role: {:?}", admin.role);
                    println!("   Permissions: {}", admin.permissions.len());
                }
                None => println!("Not logged in"),
            }
        }
        Commands::Logout => {
            let mut gate = build_gate(&config, &paths, Arc::new(NullSurface), FacingMode::User)?;
            gate.restore_session();
            gate.logout().await?;
            println!("Logged out");
        }
        Commands::ListCameras => list_cameras()?,
        Commands::TestCamera => {
            println!("Testing camera...");
            let mut device = CaptureDevice::new(
                Box::new(V4l2Backend::new(&config.camera)),
                Arc::new(NullSurface),
            );
            let mut handle = device.acquire(config.camera.facing)?;
            let frame = handle.capture_frame()?;
            handle.release();

            let save_path = dev_mode.get_capture_path("test_capture");
            frame.save(&save_path)?;
            println!("Saved test image to {:?}", save_path);
        }
        Commands::TestDetection => test_detection(&config, &dev_mode)?,
    }

    Ok(())
}

fn load_config(dev_mode: &DevMode) -> Result<Config> {
    let path = config_file(dev_mode);
    if path.exists() {
        return Ok(Config::load_from_path(&path)?);
    }
    tracing::warn!("No config at {}, using built-in defaults", path.display());
    Ok(Config::from_toml(BUNDLED_CONFIG)?)
}

/// Loads the local admin mirror, writing the default admin back when the
/// list was empty.
fn load_roster(paths: &Paths) -> Result<Roster> {
    let roster_file = paths.roster_file();
    let mut admins = load_roster_file(&roster_file)?;
    if seed_default_admin(&mut admins) {
        save_roster_file(&roster_file, &admins)?;
    }
    Ok(Roster::fixed(admins))
}

fn build_gate(
    config: &Config,
    paths: &Paths,
    surface: Arc<dyn DisplaySurface>,
    facing: FacingMode,
) -> Result<LoginGate<OnnxExtractor>> {
    let roster = load_roster(paths)?;
    let sessions = SessionStore::new(paths)?;
    let handoff = LoginHandoff::new(
        sessions,
        Arc::new(|admin: &AdminRecord| tracing::info!("Admin {} logged in", admin.username)),
    );

    let device = CaptureDevice::new(Box::new(V4l2Backend::new(&config.camera)), surface);
    let matcher = MatchLoop::new(device, OnnxExtractor::new(config), &config.scan, facing);
    Ok(LoginGate::new(roster, handoff, matcher))
}

async fn face_login(config: &Config, paths: &Paths, preview: bool, facing: FacingMode) -> Result<()> {
    let ascii = preview.then(|| Arc::new(AsciiSurface::new()));
    let surface: Arc<dyn DisplaySurface> = match &ascii {
        Some(ascii) => ascii.clone() as Arc<dyn DisplaySurface>,
        None => Arc::new(NullSurface),
    };

    let mut gate = build_gate(config, paths, surface, facing)?;
    let mut updates = gate.start_face_login();
    println!("Look at the camera. Press Ctrl+C to cancel.");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                gate.switch_mode(LoginMode::Password).await;
                break None;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break gate.wait_face_login().await;
                }
                let update = updates.borrow_and_update().clone();
                match &ascii {
                    Some(ascii) => ascii.set_status(&update.message),
                    None => println!("{}", update.message),
                }
                if matches!(update.state, ScanState::Matched(_) | ScanState::Error(_)) {
                    break gate.wait_face_login().await;
                }
            }
        }
    };

    match outcome {
        Some(ScanOutcome::Matched(admin)) => print_welcome(&admin),
        Some(ScanOutcome::Failed(e)) if e.falls_back_to_password() => {
            println!("❌ Face login unavailable: {}", e);
            println!("   Use `gymauth login -u <username> -p <password>` instead.");
        }
        Some(ScanOutcome::Failed(e)) => return Err(e.into()),
        Some(ScanOutcome::Cancelled) | None => println!("Face login cancelled"),
    }

    Ok(())
}

fn print_welcome(admin: &AdminRecord) {
    let name = if admin.name.is_empty() { &admin.username } else { &admin.name };
    println!("✅ Welcome, {}!", name);
}

fn list_cameras() -> Result<()> {
    println!("🔍 Detecting available cameras...\n");

    let cameras = camera::list_all_cameras()?;
    if cameras.is_empty() {
        println!("❌ No cameras found!");
        println!("\nTroubleshooting:");
        println!("  1. Check if cameras are connected");
        println!("  2. Ensure you have permission to access /dev/video*");
        return Ok(());
    }

    for info in &cameras {
        println!("📷 /dev/video{}: {}", info.index, info.name);
        for feature in &info.features {
            println!("   - {}", feature);
        }
        if info.likely_ir {
            println!("   (likely IR)");
        }
        println!();
    }

    println!("═══════════════════════════════════════════════════════");
    match camera::detect_ir_camera() {
        Ok(index) => println!("Auto-detect (device_index = 999) would use /dev/video{}", index),
        Err(e) => println!("⚠️  Auto-detect failed: {}", e),
    }
    println!("\n📝 To pick a camera, set [camera] device_index in the config.");
    Ok(())
}

fn test_detection(config: &Config, dev_mode: &DevMode) -> Result<()> {
    let mut device = CaptureDevice::new(
        Box::new(V4l2Backend::new(&config.camera)),
        Arc::new(NullSurface),
    );
    let mut extractor = OnnxExtractor::new(config);

    println!("Capturing frame from camera {}...", config.camera.device_index);
    let frame = {
        let mut handle = device.acquire(config.camera.facing)?;
        handle.capture_frame()?
    };

    let save_path = dev_mode.get_capture_path("detection_test");
    frame.save(&save_path)?;
    println!("Saved original image to {:?}", save_path);

    println!("Detecting faces...");
    let faces = extractor.detect_faces(&frame)?;
    let selected = select_face(&faces);
    println!("Found {} face(s) above threshold {}", faces.len(), config.detector.detection_confidence);
    for (i, face) in faces.iter().enumerate() {
        let marker = if Some(face) == selected { " <- used for login" } else { "" };
        println!("  Face {}: confidence {:.3}{}", i + 1, face.confidence, marker);
    }

    println!("{}", AsciiRenderer::new(None, None).render(&frame, selected, ""));

    let debug_path = dev_mode.get_debug_path("detection_annotated");
    annotate_faces(&frame, &faces, selected).save(&debug_path)?;
    println!("\nSaved annotated image to: {:?}", debug_path);

    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .init();
    }
}
