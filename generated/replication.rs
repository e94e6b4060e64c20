#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoEmpty {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGpid {
    #[prost(int32, tag = "1")]
    pub app_id: i32,
    #[prost(int32, tag = "2")]
    pub partition_index: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppInfo {
    #[prost(int32, tag = "1")]
    pub app_id: i32,
    #[prost(string, tag = "2")]
    pub app_name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub app_type: ::prost::alloc::string::String,
    #[prost(int32, tag = "4")]
    pub partition_count: i32,
    #[prost(uint32, tag = "5")]
    pub max_replica_count: u32,
    #[prost(map = "string, string", tag = "6")]
    pub envs:
        ::std::collections::HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPartitionConfiguration {
    #[prost(message, optional, tag = "1")]
    pub pid: ::core::option::Option<ProtoGpid>,
    #[prost(int64, tag = "2")]
    pub ballot: i64,
    #[prost(uint32, tag = "3")]
    pub max_replica_count: u32,
    #[prost(string, tag = "4")]
    pub primary: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "5")]
    pub secondaries: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(int64, tag = "6")]
    pub last_committed_decree: i64,
    #[prost(string, repeated, tag = "7")]
    pub last_drops: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReplicaConfiguration {
    #[prost(message, optional, tag = "1")]
    pub pid: ::core::option::Option<ProtoGpid>,
    #[prost(int64, tag = "2")]
    pub ballot: i64,
    #[prost(string, tag = "3")]
    pub primary: ::prost::alloc::string::String,
    #[prost(int32, tag = "4")]
    pub status: i32,
    #[prost(uint64, tag = "5")]
    pub learner_signature: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRemoteFile {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub size: u64,
    #[prost(uint32, tag = "3")]
    pub crc32: u32,
}
/// Mutations travel in their write-ahead log encoding.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPrepareRequest {
    #[prost(message, optional, tag = "1")]
    pub config: ::core::option::Option<ProtoReplicaConfiguration>,
    #[prost(bytes = "vec", tag = "2")]
    pub mutation: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPrepareAck {
    #[prost(message, optional, tag = "1")]
    pub pid: ::core::option::Option<ProtoGpid>,
    #[prost(int32, tag = "2")]
    pub err: i32,
    #[prost(int64, tag = "3")]
    pub ballot: i64,
    #[prost(int64, tag = "4")]
    pub decree: i64,
    #[prost(int64, tag = "5")]
    pub last_committed_decree_in_app: i64,
    #[prost(int64, tag = "6")]
    pub last_committed_decree_in_prepare_list: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGroupCheckRequest {
    #[prost(message, optional, tag = "1")]
    pub app: ::core::option::Option<ProtoAppInfo>,
    #[prost(string, tag = "2")]
    pub node: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub config: ::core::option::Option<ProtoReplicaConfiguration>,
    #[prost(int64, tag = "4")]
    pub last_committed_decree: i64,
    /// Unset unless the primary is splitting.
    #[prost(message, optional, tag = "5")]
    pub child_gpid: ::core::option::Option<ProtoGpid>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGroupCheckResponse {
    #[prost(message, optional, tag = "1")]
    pub pid: ::core::option::Option<ProtoGpid>,
    #[prost(int32, tag = "2")]
    pub err: i32,
    #[prost(string, tag = "3")]
    pub node: ::prost::alloc::string::String,
    #[prost(int64, tag = "4")]
    pub last_committed_decree_in_app: i64,
    #[prost(int64, tag = "5")]
    pub last_committed_decree_in_prepare_list: i64,
    /// 0 unless the responder is a learner.
    #[prost(int32, tag = "6")]
    pub learner_status: i32,
    #[prost(uint64, tag = "7")]
    pub learner_signature: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLearnRequest {
    #[prost(message, optional, tag = "1")]
    pub pid: ::core::option::Option<ProtoGpid>,
    #[prost(string, tag = "2")]
    pub learner: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub signature: u64,
    #[prost(int64, tag = "4")]
    pub last_committed_decree_in_app: i64,
    #[prost(int64, tag = "5")]
    pub last_committed_decree_in_prepare_list: i64,
    #[prost(bytes = "vec", tag = "6")]
    pub app_specific_learn_request: ::prost::alloc::vec::Vec<u8>,
    #[prost(int64, tag = "7")]
    pub max_gced_decree: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLearnResponse {
    #[prost(int32, tag = "1")]
    pub err: i32,
    #[prost(message, optional, tag = "2")]
    pub config: ::core::option::Option<ProtoReplicaConfiguration>,
    #[prost(string, tag = "3")]
    pub learnee: ::prost::alloc::string::String,
    #[prost(int64, tag = "4")]
    pub last_committed_decree: i64,
    #[prost(int64, tag = "5")]
    pub prepare_start_decree: i64,
    #[prost(int32, tag = "6")]
    pub learn_type: i32,
    #[prost(int64, tag = "7")]
    pub from_decree_excluded: i64,
    #[prost(int64, tag = "8")]
    pub to_decree_included: i64,
    #[prost(bytes = "vec", tag = "9")]
    pub meta: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "10")]
    pub base_local_dir: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "11")]
    pub files: ::prost::alloc::vec::Vec<ProtoRemoteFile>,
    #[prost(bytes = "vec", repeated, tag = "12")]
    pub mutations: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLearnNotification {
    #[prost(message, optional, tag = "1")]
    pub pid: ::core::option::Option<ProtoGpid>,
    #[prost(string, tag = "2")]
    pub learner: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub signature: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLearnNotificationResponse {
    #[prost(int32, tag = "1")]
    pub err: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoCopyCheckpointRequest {
    #[prost(message, optional, tag = "1")]
    pub pid: ::core::option::Option<ProtoGpid>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoCopyCheckpointResponse {
    #[prost(int32, tag = "1")]
    pub err: i32,
    #[prost(int64, tag = "2")]
    pub checkpoint_decree: i64,
    #[prost(string, tag = "3")]
    pub base_local_dir: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "4")]
    pub files: ::prost::alloc::vec::Vec<ProtoRemoteFile>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoFetchFileRequest {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoFetchFileResponse {
    #[prost(int32, tag = "1")]
    pub err: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoConfigProposal {
    #[prost(message, optional, tag = "1")]
    pub app: ::core::option::Option<ProtoAppInfo>,
    #[prost(message, optional, tag = "2")]
    pub config: ::core::option::Option<ProtoPartitionConfiguration>,
    #[prost(int32, tag = "3")]
    pub config_type: i32,
    #[prost(string, tag = "4")]
    pub node: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoConfigurationUpdate {
    #[prost(message, optional, tag = "1")]
    pub app: ::core::option::Option<ProtoAppInfo>,
    #[prost(message, optional, tag = "2")]
    pub config: ::core::option::Option<ProtoPartitionConfiguration>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAddChildRequest {
    #[prost(message, optional, tag = "1")]
    pub app: ::core::option::Option<ProtoAppInfo>,
    #[prost(message, optional, tag = "2")]
    pub parent_config: ::core::option::Option<ProtoPartitionConfiguration>,
    #[prost(message, optional, tag = "3")]
    pub child_gpid: ::core::option::Option<ProtoGpid>,
}
#[doc = r" Generated client implementations."]
pub mod grpc_replica_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    pub struct GrpcReplicaClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl GrpcReplicaClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> GrpcReplicaClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        pub async fn prepare(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoPrepareRequest>,
        ) -> Result<tonic::Response<super::ProtoPrepareAck>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replication.GrpcReplica/Prepare");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn group_check(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoGroupCheckRequest>,
        ) -> Result<tonic::Response<super::ProtoGroupCheckResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replication.GrpcReplica/GroupCheck");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn learn(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoLearnRequest>,
        ) -> Result<tonic::Response<super::ProtoLearnResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replication.GrpcReplica/Learn");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn learn_completion_notification(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoLearnNotification>,
        ) -> Result<tonic::Response<super::ProtoLearnNotificationResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/replication.GrpcReplica/LearnCompletionNotification",
            );
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn copy_checkpoint(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoCopyCheckpointRequest>,
        ) -> Result<tonic::Response<super::ProtoCopyCheckpointResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replication.GrpcReplica/CopyCheckpoint");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn fetch_file(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoFetchFileRequest>,
        ) -> Result<tonic::Response<super::ProtoFetchFileResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replication.GrpcReplica/FetchFile");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn config_proposal(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoConfigProposal>,
        ) -> Result<tonic::Response<super::ProtoEmpty>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replication.GrpcReplica/ConfigProposal");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn update_configuration(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoConfigurationUpdate>,
        ) -> Result<tonic::Response<super::ProtoEmpty>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/replication.GrpcReplica/UpdateConfiguration",
            );
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn add_child(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoAddChildRequest>,
        ) -> Result<tonic::Response<super::ProtoEmpty>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replication.GrpcReplica/AddChild");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for GrpcReplicaClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for GrpcReplicaClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "GrpcReplicaClient {{ ... }}")
        }
    }
}
#[doc = r" Generated server implementations."]
pub mod grpc_replica_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = "Generated trait containing gRPC methods that should be implemented for use with GrpcReplicaServer."]
    #[async_trait]
    pub trait GrpcReplica: Send + Sync + 'static {
        async fn prepare(
            &self,
            request: tonic::Request<super::ProtoPrepareRequest>,
        ) -> Result<tonic::Response<super::ProtoPrepareAck>, tonic::Status>;
        async fn group_check(
            &self,
            request: tonic::Request<super::ProtoGroupCheckRequest>,
        ) -> Result<tonic::Response<super::ProtoGroupCheckResponse>, tonic::Status>;
        async fn learn(
            &self,
            request: tonic::Request<super::ProtoLearnRequest>,
        ) -> Result<tonic::Response<super::ProtoLearnResponse>, tonic::Status>;
        async fn learn_completion_notification(
            &self,
            request: tonic::Request<super::ProtoLearnNotification>,
        ) -> Result<tonic::Response<super::ProtoLearnNotificationResponse>, tonic::Status>;
        async fn copy_checkpoint(
            &self,
            request: tonic::Request<super::ProtoCopyCheckpointRequest>,
        ) -> Result<tonic::Response<super::ProtoCopyCheckpointResponse>, tonic::Status>;
        async fn fetch_file(
            &self,
            request: tonic::Request<super::ProtoFetchFileRequest>,
        ) -> Result<tonic::Response<super::ProtoFetchFileResponse>, tonic::Status>;
        async fn config_proposal(
            &self,
            request: tonic::Request<super::ProtoConfigProposal>,
        ) -> Result<tonic::Response<super::ProtoEmpty>, tonic::Status>;
        async fn update_configuration(
            &self,
            request: tonic::Request<super::ProtoConfigurationUpdate>,
        ) -> Result<tonic::Response<super::ProtoEmpty>, tonic::Status>;
        async fn add_child(
            &self,
            request: tonic::Request<super::ProtoAddChildRequest>,
        ) -> Result<tonic::Response<super::ProtoEmpty>, tonic::Status>;
    }
    #[derive(Debug)]
    pub struct GrpcReplicaServer<T: GrpcReplica> {
        inner: _Inner<T>,
    }
    struct _Inner<T>(Arc<T>, Option<tonic::Interceptor>);
    impl<T: GrpcReplica> GrpcReplicaServer<T> {
        pub fn new(inner: T) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, None);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, Some(interceptor.into()));
            Self { inner }
        }
    }
    impl<T, B> Service<http::Request<B>> for GrpcReplicaServer<T>
    where
        T: GrpcReplica,
        B: HttpBody + Send + Sync + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Never;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();
            match req.uri().path() {
                "/replication.GrpcReplica/Prepare" => {
                    #[allow(non_camel_case_types)]
                    struct PrepareSvc<T: GrpcReplica>(pub Arc<T>);
                    impl<T: GrpcReplica> tonic::server::UnaryService<super::ProtoPrepareRequest> for PrepareSvc<T> {
                        type Response = super::ProtoPrepareAck;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoPrepareRequest>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).prepare(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = PrepareSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replication.GrpcReplica/GroupCheck" => {
                    #[allow(non_camel_case_types)]
                    struct GroupCheckSvc<T: GrpcReplica>(pub Arc<T>);
                    impl<T: GrpcReplica> tonic::server::UnaryService<super::ProtoGroupCheckRequest>
                        for GroupCheckSvc<T>
                    {
                        type Response = super::ProtoGroupCheckResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoGroupCheckRequest>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).group_check(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = GroupCheckSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replication.GrpcReplica/Learn" => {
                    #[allow(non_camel_case_types)]
                    struct LearnSvc<T: GrpcReplica>(pub Arc<T>);
                    impl<T: GrpcReplica> tonic::server::UnaryService<super::ProtoLearnRequest> for LearnSvc<T> {
                        type Response = super::ProtoLearnResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoLearnRequest>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).learn(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = LearnSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replication.GrpcReplica/LearnCompletionNotification" => {
                    #[allow(non_camel_case_types)]
                    struct LearnCompletionNotificationSvc<T: GrpcReplica>(pub Arc<T>);
                    impl<T: GrpcReplica> tonic::server::UnaryService<super::ProtoLearnNotification>
                        for LearnCompletionNotificationSvc<T>
                    {
                        type Response = super::ProtoLearnNotificationResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoLearnNotification>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move {
                                (*inner).learn_completion_notification(request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = LearnCompletionNotificationSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replication.GrpcReplica/CopyCheckpoint" => {
                    #[allow(non_camel_case_types)]
                    struct CopyCheckpointSvc<T: GrpcReplica>(pub Arc<T>);
                    impl<T: GrpcReplica>
                        tonic::server::UnaryService<super::ProtoCopyCheckpointRequest>
                        for CopyCheckpointSvc<T>
                    {
                        type Response = super::ProtoCopyCheckpointResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoCopyCheckpointRequest>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).copy_checkpoint(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = CopyCheckpointSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replication.GrpcReplica/FetchFile" => {
                    #[allow(non_camel_case_types)]
                    struct FetchFileSvc<T: GrpcReplica>(pub Arc<T>);
                    impl<T: GrpcReplica> tonic::server::UnaryService<super::ProtoFetchFileRequest> for FetchFileSvc<T> {
                        type Response = super::ProtoFetchFileResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoFetchFileRequest>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).fetch_file(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = FetchFileSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replication.GrpcReplica/ConfigProposal" => {
                    #[allow(non_camel_case_types)]
                    struct ConfigProposalSvc<T: GrpcReplica>(pub Arc<T>);
                    impl<T: GrpcReplica> tonic::server::UnaryService<super::ProtoConfigProposal>
                        for ConfigProposalSvc<T>
                    {
                        type Response = super::ProtoEmpty;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoConfigProposal>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).config_proposal(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = ConfigProposalSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replication.GrpcReplica/UpdateConfiguration" => {
                    #[allow(non_camel_case_types)]
                    struct UpdateConfigurationSvc<T: GrpcReplica>(pub Arc<T>);
                    impl<T: GrpcReplica>
                        tonic::server::UnaryService<super::ProtoConfigurationUpdate>
                        for UpdateConfigurationSvc<T>
                    {
                        type Response = super::ProtoEmpty;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoConfigurationUpdate>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).update_configuration(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = UpdateConfigurationSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replication.GrpcReplica/AddChild" => {
                    #[allow(non_camel_case_types)]
                    struct AddChildSvc<T: GrpcReplica>(pub Arc<T>);
                    impl<T: GrpcReplica> tonic::server::UnaryService<super::ProtoAddChildRequest> for AddChildSvc<T> {
                        type Response = super::ProtoEmpty;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoAddChildRequest>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).add_child(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = AddChildSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(tonic::body::BoxBody::empty())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: GrpcReplica> Clone for GrpcReplicaServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self { inner }
        }
    }
    impl<T: GrpcReplica> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone(), self.1.clone())
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: GrpcReplica> tonic::transport::NamedService for GrpcReplicaServer<T> {
        const NAME: &'static str = "replication.GrpcReplica";
    }
}
