use rollcall_core::{
    Analyzer, AnalyzerError, Detection, FaceAnnotation, FrameOutcome, Identity, MatchParams,
    SessionError, StableResult,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Rebuild {
        identities: Vec<Identity>,
        params: MatchParams,
        reply: oneshot::Sender<Result<(), AnalyzerError>>,
    },
    Start {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Frame {
        detections: Vec<Detection>,
        reply: oneshot::Sender<Result<FrameOutcome, SessionError>>,
    },
    Finish {
        reply: oneshot::Sender<Result<Vec<StableResult>, SessionError>>,
    },
    Abort {
        reply: oneshot::Sender<()>,
    },
    Annotate {
        detections: Vec<Detection>,
        reply: oneshot::Sender<Vec<FaceAnnotation>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Every session mutation goes through the channel, so frames are folded in
/// one at a time in submission order no matter how many handles exist.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Replace the roster. Refused while a session is accumulating.
    pub async fn rebuild(
        &self,
        identities: Vec<Identity>,
        params: MatchParams,
    ) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Rebuild {
            identities,
            params,
            reply,
        })
        .await??;
        Ok(())
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Start { reply }).await??;
        Ok(())
    }

    pub async fn push_frame(
        &self,
        detections: Vec<Detection>,
    ) -> Result<FrameOutcome, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Frame { detections, reply })
            .await??)
    }

    pub async fn finish(&self) -> Result<Vec<StableResult>, EngineError> {
        Ok(self.request(|reply| EngineRequest::Finish { reply }).await??)
    }

    pub async fn abort(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Abort { reply }).await
    }

    pub async fn annotate(
        &self,
        detections: Vec<Detection>,
    ) -> Result<Vec<FaceAnnotation>, EngineError> {
        self.request(|reply| EngineRequest::Annotate { detections, reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Move the analyzer onto a dedicated OS thread and return a handle to it.
///
/// The thread exits once every handle has been dropped.
pub fn spawn_engine(analyzer: Analyzer) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut analyzer = analyzer;
            tracing::debug!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle_request(&mut analyzer, req);
            }
            tracing::debug!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn handle_request(analyzer: &mut Analyzer, req: EngineRequest) {
    match req {
        EngineRequest::Rebuild {
            identities,
            params,
            reply,
        } => {
            let _ = reply.send(analyzer.rebuild_registry(identities, params));
        }
        EngineRequest::Start { reply } => {
            let _ = reply.send(analyzer.start_session());
        }
        EngineRequest::Frame { detections, reply } => {
            let _ = reply.send(analyzer.push_frame(detections));
        }
        EngineRequest::Finish { reply } => {
            let _ = reply.send(analyzer.finish_session());
        }
        EngineRequest::Abort { reply } => {
            analyzer.abort_session();
            let _ = reply.send(());
        }
        EngineRequest::Annotate { detections, reply } => {
            let _ = reply.send(analyzer.annotate(detections));
        }
    }
}
