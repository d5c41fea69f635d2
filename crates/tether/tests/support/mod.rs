use std::sync::{Arc, Mutex};

use tether::{
    progress::ProgressReport,
    surface::{QualityState, ReadyState, TimeRange},
    LoadToken, MediaInfo, ProbeApi, ProgressApi, SessionHandle, SessionOptions, Surface,
    TetherError, TetherResult, TranscodeApi,
};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCommand {
    Attach(Url, LoadToken),
    Detach,
    Seek(f64),
    Rate(f64),
    Play,
    Pause,
    RecoverMedia,
    ReloadFrom(f64),
    ForceLevel(usize),
}

/// Scriptable surface recording everything the engine asks of it.
#[derive(Debug, Clone)]
pub struct MockSurface {
    pub time: f64,
    pub duration: Option<f64>,
    pub buffered: Vec<TimeRange>,
    pub rate: f64,
    pub paused: bool,
    pub seeking: bool,
    pub ready: ReadyState,
    pub quality: QualityState,
    pub token: Option<LoadToken>,
    pub commands: Vec<SurfaceCommand>,
}

impl MockSurface {
    pub fn new() -> Self {
        Self {
            time: 0.,
            duration: None,
            buffered: Vec::new(),
            rate: 1.,
            paused: true,
            seeking: false,
            ready: ReadyState::EnoughData,
            quality: QualityState::default(),
            token: None,
            commands: Vec::new(),
        }
    }

    pub fn token(&self) -> LoadToken {
        self.token.expect("nothing attached")
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                SurfaceCommand::Seek(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    pub fn attached(&self) -> Vec<Url> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                SurfaceCommand::Attach(url, _) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn did(&self, command: &SurfaceCommand) -> bool {
        self.commands.contains(command)
    }
}

impl Surface for MockSurface {
    fn attach(&mut self, manifest: &Url, token: LoadToken) {
        self.time = 0.;
        self.token = Some(token);
        self.commands
            .push(SurfaceCommand::Attach(manifest.clone(), token));
    }

    fn detach(&mut self) {
        self.token = None;
        self.commands.push(SurfaceCommand::Detach);
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.time = seconds;
        self.commands.push(SurfaceCommand::Seek(seconds));
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.buffered.clone()
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.rate = rate;
        self.commands.push(SurfaceCommand::Rate(rate));
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn is_seeking(&self) -> bool {
        self.seeking
    }

    fn ready_state(&self) -> ReadyState {
        self.ready
    }

    fn play(&mut self) {
        self.paused = false;
        self.commands.push(SurfaceCommand::Play);
    }

    fn pause(&mut self) {
        self.paused = true;
        self.commands.push(SurfaceCommand::Pause);
    }

    fn recover_media_error(&mut self) {
        self.commands.push(SurfaceCommand::RecoverMedia);
    }

    fn reload_from(&mut self, seconds: f64) {
        self.commands.push(SurfaceCommand::ReloadFrom(seconds));
    }

    fn quality(&self) -> QualityState {
        self.quality
    }

    fn force_level(&mut self, level: usize) {
        self.commands.push(SurfaceCommand::ForceLevel(level));
    }
}

#[derive(Debug, Default)]
pub struct ApiLog {
    pub created: Vec<(Url, SessionOptions)>,
    pub destroyed: Vec<String>,
    pub probed: Vec<Url>,
    pub progress: Vec<ProgressReport>,
}

/// In-memory backend handing out `s1`, `s2`, ... as session ids.
#[derive(Clone, Default)]
pub struct FakeApi {
    pub log: Arc<Mutex<ApiLog>>,
    pub fail_create: bool,
}

impl FakeApi {
    pub fn snapshot<T>(&self, f: impl FnOnce(&ApiLog) -> T) -> T {
        f(&self.log.lock().unwrap())
    }
}

impl TranscodeApi for FakeApi {
    async fn create_session(
        &self,
        source: &Url,
        options: &SessionOptions,
    ) -> TetherResult<SessionHandle> {
        if self.fail_create {
            return Err(TetherError::HttpError(reqwest::StatusCode::BAD_GATEWAY));
        }
        let mut log = self.log.lock().unwrap();
        log.created.push((source.clone(), options.clone()));
        let session_id = format!("s{}", log.created.len());
        Ok(SessionHandle {
            manifest_url: manifest(&session_id),
            session_id,
        })
    }

    async fn destroy_session(&self, session_id: &str) -> TetherResult<()> {
        self.log.lock().unwrap().destroyed.push(session_id.to_string());
        Ok(())
    }
}

impl ProbeApi for FakeApi {
    async fn probe(&self, source: &Url) -> TetherResult<MediaInfo> {
        self.log.lock().unwrap().probed.push(source.clone());
        Ok(MediaInfo {
            duration_seconds: Some(5400.),
            ..Default::default()
        })
    }
}

impl ProgressApi for FakeApi {
    async fn save_progress(&self, report: &ProgressReport) -> TetherResult<()> {
        self.log.lock().unwrap().progress.push(report.clone());
        Ok(())
    }
}

pub fn source() -> Url {
    Url::parse("http://iptv.example/movie/1234.mkv").unwrap()
}

pub fn manifest(session_id: &str) -> Url {
    Url::parse(&format!("http://api.example/api/transcode/{session_id}/index.m3u8")).unwrap()
}

pub fn handle(session_id: &str) -> SessionHandle {
    SessionHandle {
        session_id: session_id.to_string(),
        manifest_url: manifest(session_id),
    }
}
