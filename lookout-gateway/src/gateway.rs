//! Request dispatch for the gateway node.

use lookout_protocol::protocol::{ErrorKind, Request, Response, ResponseData};
use tracing::{debug, warn};

use crate::orchestrator::LogFetcher;
use crate::registry::SharedRegistry;
use crate::resolver::StatusSource;

pub struct Gateway<S> {
    fetcher: LogFetcher<S>,
}

impl<S: StatusSource> Gateway<S> {
    pub fn new(fetcher: LogFetcher<S>) -> Self {
        Self { fetcher }
    }

    pub fn registry(&self) -> &SharedRegistry {
        self.fetcher.resolver().registry()
    }

    pub fn fetcher(&self) -> &LogFetcher<S> {
        &self.fetcher
    }

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::ok_with_message("pong"),

            Request::FetchLog {
                function,
                instance,
                worker_id,
                query,
            } => {
                debug!("FetchLog {} instance {}", function, instance);
                match self
                    .fetcher
                    .fetch_log(&function, instance, worker_id.as_deref(), &query)
                    .await
                {
                    Ok(page) => Response::ok_with_data(ResponseData::Page(page)),
                    Err(e) => {
                        warn!("Log fetch for {} instance {} failed: {}", function, instance, e);
                        Response::error(e.kind(), e.to_string())
                    }
                }
            }

            Request::DescribeFunction { function } => match self.registry().get(&function) {
                Some(record) => Response::ok_with_data(ResponseData::Function(
                    record.to_function_info(),
                )),
                None => Response::error(
                    ErrorKind::NotFound,
                    format!("function {} not found", function),
                ),
            },

            Request::CountFunctions { tenant } => {
                Response::ok_with_data(ResponseData::Count(self.registry().count_by_tenant(&tenant)))
            }

            Request::ReadLog(_) => Response::error(
                ErrorKind::InvalidRequest,
                "ReadLog is served by log agents, not the gateway",
            ),
        }
    }
}
