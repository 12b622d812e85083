use canpipe_driver::{ControlCommand, ControlReply, Device};
use canpipe_hw::{Register, SimController};
use tracing::debug;

use crate::cmd::{DeviceArgs, RegistersArgs};
use crate::exit::{driver_error, CliResult, SUCCESS};
use crate::output::{print_registers, OutputFormat, RegisterValue};

pub fn run(args: RegistersArgs, device_args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let config = device_args.resolve()?;
    let sim = SimController::new();
    let device = Device::new(sim.clone(), &config)
        .map_err(|err| driver_error("device start failed", err))?;
    let client = device
        .open()
        .map_err(|err| driver_error("open failed", err))?;

    if args.loopback {
        client
            .control(ControlCommand::EnableLoopback)
            .map_err(|err| driver_error("loopback failed", err))?;
    }
    if args.no_self_reception {
        client
            .control(ControlCommand::DisableSelfReception)
            .map_err(|err| driver_error("self-reception failed", err))?;
    }
    if let Some(bits) = args.raise_errors {
        sim.raise_error(bits);
    }

    let registers = if args.registers.is_empty() {
        Register::ALL.to_vec()
    } else {
        args.registers
    };
    let mut values = Vec::with_capacity(registers.len());
    for register in registers {
        let reply = client
            .control(ControlCommand::ReadRegister { register })
            .map_err(|err| driver_error("register read failed", err))?;
        if let ControlReply::Register { register, value } = reply {
            debug!(%register, value, "register read");
            values.push(RegisterValue { register, value });
        }
    }
    client.close();
    device.shutdown();

    print_registers(&values, format);
    Ok(SUCCESS)
}
