// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::future;

use modbus_engine::{
    client::{Context, Reader as _, Writer as _},
    server::Service,
    ExceptionCode, Request, Response, SlaveRequest,
};

pub struct TestService {}

impl TestService {
    fn handle(&self, req: Request<'static>) -> Result<Option<Response>, ExceptionCode> {
        use Request::*;

        let exception = match req {
            ReadCoils(_, _) => ExceptionCode::Acknowledge,
            ReadDiscreteInputs(_, _) => ExceptionCode::GatewayPathUnavailable,
            WriteSingleCoil(_, _) => ExceptionCode::GatewayTargetDevice,
            WriteMultipleCoils(_, _) => ExceptionCode::IllegalDataAddress,
            ReadInputRegisters(_, _) => ExceptionCode::IllegalDataValue,
            ReadHoldingRegisters(_, _) => ExceptionCode::IllegalFunction,
            WriteSingleRegister(_, _) => ExceptionCode::MemoryParityError,
            WriteMultipleRegisters(_, _) => ExceptionCode::ServerDeviceBusy,
            MaskWriteRegister(_, _, _) => ExceptionCode::ServerDeviceFailure,
            _ => ExceptionCode::IllegalFunction,
        };
        Err(exception)
    }
}

impl Service for TestService {
    type Future = future::Ready<Result<Option<Response>, ExceptionCode>>;

    fn call(&self, req: SlaveRequest<'static>) -> Self::Future {
        future::ready(self.handle(req.request))
    }
}

pub async fn check_client_context(mut ctx: Context) {
    let err = ctx.read_coils(0x00, 2).await.unwrap_err();
    assert_eq!(err.exception_code(), Some(ExceptionCode::Acknowledge));

    let err = ctx.read_discrete_inputs(0x00, 2).await.unwrap_err();
    assert_eq!(
        err.exception_code(),
        Some(ExceptionCode::GatewayPathUnavailable)
    );

    let err = ctx.write_single_coil(0x00, true).await.unwrap_err();
    assert_eq!(
        err.exception_code(),
        Some(ExceptionCode::GatewayTargetDevice)
    );

    let err = ctx.write_multiple_coils(0x00, &[true]).await.unwrap_err();
    assert_eq!(
        err.exception_code(),
        Some(ExceptionCode::IllegalDataAddress)
    );

    let err = ctx.read_input_registers(0x00, 2).await.unwrap_err();
    assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalDataValue));

    let err = ctx.read_holding_registers(0x00, 2).await.unwrap_err();
    assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalFunction));

    let err = ctx.write_single_register(0x00, 42).await.unwrap_err();
    assert_eq!(err.exception_code(), Some(ExceptionCode::MemoryParityError));

    let err = ctx.write_multiple_registers(0x00, &[42]).await.unwrap_err();
    assert_eq!(err.exception_code(), Some(ExceptionCode::ServerDeviceBusy));

    let err = ctx.mask_write_register(0x00, 0, 0).await.unwrap_err();
    assert_eq!(
        err.exception_code(),
        Some(ExceptionCode::ServerDeviceFailure)
    );
}
