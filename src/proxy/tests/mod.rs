// 跨模块场景测试

mod gateway_service;
