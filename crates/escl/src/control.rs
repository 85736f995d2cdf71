//! 서버 제어 채널
//!
//! 라우터(`/reset`), 핫플러그 감시자, 시그널 처리기가 서버 루프에
//! 재로딩이나 종료를 요청하는 통로입니다. 서버 루프는 [`ControlReceiver::recv`]로
//! 다음 [`TerminationReason`]을 기다립니다.

use tokio::sync::mpsc;
use tracing::debug;

/// 서버 루프 한 사이클이 끝나는 이유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// 스캐너 집합을 다시 열거
    ReloadRequested,
    /// 프로세스 종료
    ShutdownRequested,
    /// 복구할 수 없는 내부 오류
    Fault(String),
}

/// 제어 요청 송신 측 (복제 가능)
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<TerminationReason>,
}

impl ControlHandle {
    pub fn request_reload(&self) {
        self.send(TerminationReason::ReloadRequested);
    }

    pub fn request_shutdown(&self) {
        self.send(TerminationReason::ShutdownRequested);
    }

    pub fn fault(&self, reason: impl Into<String>) {
        self.send(TerminationReason::Fault(reason.into()));
    }

    fn send(&self, reason: TerminationReason) {
        debug!(?reason, "control request");
        // 수신 측이 이미 닫혔으면 서버가 종료 중
        let _ = self.tx.send(reason);
    }
}

/// 제어 요청 수신 측
#[derive(Debug)]
pub struct ControlReceiver {
    rx: mpsc::UnboundedReceiver<TerminationReason>,
}

impl ControlReceiver {
    /// 다음 요청을 기다립니다. 모든 송신 측이 사라지면 종료로 간주합니다.
    pub async fn recv(&mut self) -> TerminationReason {
        self.rx
            .recv()
            .await
            .unwrap_or(TerminationReason::ShutdownRequested)
    }

    /// 대기 중인 재로딩 요청을 버립니다. 종료 요청이 있으면 그것을 돌려줍니다.
    ///
    /// 재로딩 직후, 이전 사이클에서 쌓인 중복 재로딩 요청을 비우는 데 씁니다.
    pub fn drain_reloads(&mut self) -> Option<TerminationReason> {
        while let Ok(reason) = self.rx.try_recv() {
            if reason != TerminationReason::ReloadRequested {
                return Some(reason);
            }
        }
        None
    }
}

/// 제어 채널을 만듭니다.
pub fn control_channel() -> (ControlHandle, ControlReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlHandle { tx }, ControlReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_arrive_in_order() {
        let (handle, mut rx) = control_channel();
        handle.request_reload();
        handle.fault("boom");

        assert_eq!(rx.recv().await, TerminationReason::ReloadRequested);
        assert_eq!(rx.recv().await, TerminationReason::Fault("boom".to_owned()));
    }

    #[tokio::test]
    async fn closed_channel_means_shutdown() {
        let (handle, mut rx) = control_channel();
        drop(handle);
        assert_eq!(rx.recv().await, TerminationReason::ShutdownRequested);
    }

    #[test]
    fn drain_discards_reloads_but_keeps_shutdown() {
        let (handle, mut rx) = control_channel();
        handle.request_reload();
        handle.request_reload();
        assert_eq!(rx.drain_reloads(), None);

        handle.request_reload();
        handle.request_shutdown();
        assert_eq!(rx.drain_reloads(), Some(TerminationReason::ShutdownRequested));
    }
}
