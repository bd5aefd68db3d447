//! 作业队列接口
//!
//! 分布式作业农场是外部协作者；引擎只消费 `enqueue`/`wait_for`
//! 两个动作。`LocalJobQueue` 是进程内参考实现：固定工作线程池 +
//! crossbeam 通道，顶层对象在这里扇出并发。

use crate::error::{AppError, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// 作业完成凭据
pub type JobCookie = String;

/// 作业结果
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub ok: bool,
    pub message: Option<String>,
}

/// 作业农场接口
pub trait JobQueue: Send + Sync {
    /// 投递一个命令；`cookie` 用于之后等待完成
    fn enqueue(&self, command: &str, args: Vec<String>, cookie: JobCookie) -> Result<()>;

    /// 阻塞等待某个作业完成
    fn wait_for(&self, cookie: &JobCookie) -> Result<JobOutcome>;
}

/// 作业处理函数
pub type JobHandler = Arc<dyn Fn(&str, &[String]) -> Result<()> + Send + Sync>;

struct Job {
    command: String,
    args: Vec<String>,
    cookie: JobCookie,
}

type DoneMap = Arc<(Mutex<HashMap<JobCookie, JobOutcome>>, Condvar)>;

/// 进程内作业队列
pub struct LocalJobQueue {
    tx: Option<Sender<Job>>,
    done: DoneMap,
    workers: Vec<JoinHandle<()>>,
}

impl LocalJobQueue {
    /// # 参数
    ///
    /// * `workers` - 工作线程数
    /// * `handler` - 命令处理函数（在工作线程上执行）
    pub fn new(workers: usize, handler: JobHandler) -> Self {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = unbounded();
        let done: DoneMap = Arc::new((Mutex::new(HashMap::new()), Condvar::new()));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = rx.clone();
            let done = Arc::clone(&done);
            let handler = Arc::clone(&handler);
            handles.push(std::thread::spawn(move || {
                while let Ok(job) = rx.recv() {
                    debug!(worker_id, command = %job.command, "job started");
                    let outcome = match handler(&job.command, &job.args) {
                        Ok(()) => JobOutcome {
                            ok: true,
                            message: None,
                        },
                        Err(e) => {
                            warn!(worker_id, command = %job.command, error = %e, "job failed");
                            JobOutcome {
                                ok: false,
                                message: Some(e.to_string()),
                            }
                        }
                    };
                    let (lock, cvar) = &*done;
                    lock.lock().insert(job.cookie, outcome);
                    cvar.notify_all();
                }
            }));
        }

        Self {
            tx: Some(tx),
            done,
            workers: handles,
        }
    }
}

impl JobQueue for LocalJobQueue {
    fn enqueue(&self, command: &str, args: Vec<String>, cookie: JobCookie) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| AppError::Internal("job queue already shut down".into()))?;
        tx.send(Job {
            command: command.to_string(),
            args,
            cookie,
        })
        .map_err(|_| AppError::Internal("job queue workers exited".into()))
    }

    fn wait_for(&self, cookie: &JobCookie) -> Result<JobOutcome> {
        let (lock, cvar) = &*self.done;
        let mut done = lock.lock();
        loop {
            if let Some(outcome) = done.remove(cookie) {
                return Ok(outcome);
            }
            cvar.wait(&mut done);
        }
    }
}

impl Drop for LocalJobQueue {
    fn drop(&mut self) {
        // 关闭投递端，工作线程消化完剩余作业后退出
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
